//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the loan lifecycle.
//! Each [`Metrics`] owns its registry, so several engines (or tests) can live
//! in one process.
//!
//! # Metrics
//!
//! - `loan_ledger_loans_created_total` - Loans created
//! - `loan_ledger_loans_approved_total` - Loans approved
//! - `loan_ledger_loans_funded_total` - Loans that reached full funding
//! - `loan_ledger_loans_disbursed_total` - Loans disbursed
//! - `loan_ledger_investments_total` - Investments accepted
//! - `loan_ledger_investments_overfunded_total` - Investments rejected for exceeding principal
//! - `loan_ledger_notifications_sent_total` / `_failed_total` / `_dropped_total`
//! - `loan_ledger_operation_duration_seconds` - Histogram of operation latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Loans created
    pub loans_created: IntCounter,

    /// Loans approved
    pub loans_approved: IntCounter,

    /// Loans fully funded
    pub loans_funded: IntCounter,

    /// Loans disbursed
    pub loans_disbursed: IntCounter,

    /// Investments accepted
    pub investments_total: IntCounter,

    /// Investments rejected as overfunded
    pub investments_overfunded: IntCounter,

    /// Notices delivered
    pub notifications_sent: IntCounter,

    /// Notices whose delivery failed
    pub notifications_failed: IntCounter,

    /// Notices dropped before delivery (queue full or closed)
    pub notifications_dropped: IntCounter,

    /// Operation duration histogram
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let loans_created = counter("loan_ledger_loans_created_total", "Loans created")?;
        let loans_approved = counter("loan_ledger_loans_approved_total", "Loans approved")?;
        let loans_funded = counter("loan_ledger_loans_funded_total", "Loans fully funded")?;
        let loans_disbursed = counter("loan_ledger_loans_disbursed_total", "Loans disbursed")?;
        let investments_total = counter("loan_ledger_investments_total", "Investments accepted")?;
        let investments_overfunded = counter(
            "loan_ledger_investments_overfunded_total",
            "Investments rejected for exceeding principal",
        )?;
        let notifications_sent = counter(
            "loan_ledger_notifications_sent_total",
            "Funded notices delivered",
        )?;
        let notifications_failed = counter(
            "loan_ledger_notifications_failed_total",
            "Funded notices whose delivery failed",
        )?;
        let notifications_dropped = counter(
            "loan_ledger_notifications_dropped_total",
            "Funded notices dropped before delivery",
        )?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "loan_ledger_operation_duration_seconds",
                "Histogram of lifecycle operation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            loans_created,
            loans_approved,
            loans_funded,
            loans_disbursed,
            investments_total,
            investments_overfunded,
            notifications_sent,
            notifications_failed,
            notifications_dropped,
            operation_duration,
            registry,
        })
    }

    /// Record operation duration
    pub fn record_operation_duration(&self, duration_seconds: f64) {
        self.operation_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.loans_created.get(), 0);
        assert_eq!(metrics.notifications_failed.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // A second collector must not collide with the first
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.loans_funded.inc();
        assert_eq!(a.loans_funded.get(), 1);
        assert_eq!(b.loans_funded.get(), 0);
    }

    #[test]
    fn test_registry_gathers_all() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation_duration(0.002);
        assert_eq!(metrics.registry().gather().len(), 10);
    }
}
