//! Loan lifecycle engine
//!
//! This module ties together the unit-of-work store, notification dispatch and
//! metrics into the lifecycle API:
//!
//! ```text
//! proposed --approve--> approved --invest(partial)--> approved
//!                                --invest(completes)--> invested --disburse--> disbursed
//! ```
//!
//! Every mutating operation locks the loan's row, validates the transition,
//! stages its records and commits them as one unit. "Fully funded" is exact
//! decimal equality between the investment total and the principal; an
//! investment that would pass the principal is rejected, never clamped.
//!
//! # Example
//!
//! ```no_run
//! use loan_ledger::{Config, LifecycleEngine, LogNotifier, NewLoan};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> loan_ledger::Result<()> {
//!     let engine = LifecycleEngine::open(&Config::default(), Arc::new(LogNotifier))?;
//!
//!     let loan = engine
//!         .create_loan(NewLoan {
//!             borrower_id: "BR123".to_string(),
//!             principal: Decimal::from(1_000_000),
//!             rate: Decimal::from(10),
//!             roi: Decimal::from(5),
//!         })
//!         .await?;
//!     println!("created loan {}", loan.id);
//!
//!     engine.shutdown().await
//! }
//! ```

use crate::{
    metrics::Metrics,
    notify::{spawn_notification_worker, FundedNotice, NotificationHandle, Notifier},
    storage::{LedgerBackend, RocksStorage},
    store::LedgerStore,
    types::{
        Approval, ApprovalRequest, DisbursementRequest, FundingSummary, Investment,
        InvestmentReceipt, InvestmentRequest, Loan, LoanId, LoanStatus, NewLoan,
    },
    Config, Error, Result,
};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Loan lifecycle engine
pub struct LifecycleEngine {
    /// Unit-of-work store
    store: LedgerStore,

    /// Funded-notice queue
    notifications: NotificationHandle,

    /// Prometheus metrics
    metrics: Metrics,

    /// Deadline for each operation
    operation_timeout: Duration,
}

impl LifecycleEngine {
    /// Build an engine over any backend. Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let notifications = spawn_notification_worker(
            notifier,
            config.notifications.queue_capacity,
            metrics.clone(),
        );

        Ok(Self {
            store: LedgerStore::new(backend, config.engine.lock_timeout()),
            notifications,
            metrics,
            operation_timeout: config.engine.operation_timeout(),
        })
    }

    /// Open an engine over RocksDB at `config.data_dir`
    pub fn open(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let backend = Arc::new(RocksStorage::open(config)?);
        Self::new(backend, notifier, config)
    }

    /// Underlying store
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Create a loan in `proposed` status
    pub async fn create_loan(&self, request: NewLoan) -> Result<Loan> {
        self.bounded("create_loan", async {
            let loan = self.store.create_loan(&request)?;

            self.metrics.loans_created.inc();
            tracing::info!(
                loan_id = %loan.id,
                borrower_id = %loan.borrower_id,
                principal = %loan.principal,
                "Loan proposed"
            );

            Ok(loan)
        })
        .await
    }

    /// Approve a proposed loan, recording who approved it and on what evidence
    pub async fn approve_loan(&self, loan_id: LoanId, request: ApprovalRequest) -> Result<Approval> {
        self.bounded("approve_loan", async {
            request.validate()?;

            let mut uow = self.store.begin();
            let loan = uow
                .lock_loan(loan_id)
                .await?
                .ok_or(Error::LoanNotFound(loan_id))?;

            if loan.status != LoanStatus::Proposed {
                return Err(Error::InvalidState {
                    loan_id,
                    status: loan.status,
                    operation: "approve",
                });
            }

            let approval = uow.create_approval(loan_id, &request)?;
            uow.update_loan_status(loan_id, LoanStatus::Approved, "approve")?;
            uow.commit()?;

            self.metrics.loans_approved.inc();
            tracing::info!(
                loan_id = %loan_id,
                staff_id = %approval.staff_id,
                approved_on = %approval.approved_on,
                "Loan approved"
            );

            Ok(approval)
        })
        .await
    }

    /// Record an investment; the call that reaches the principal exactly moves
    /// the loan to `invested` and queues a notice for every investor
    pub async fn invest_loan(
        &self,
        loan_id: LoanId,
        request: InvestmentRequest,
    ) -> Result<InvestmentReceipt> {
        self.bounded("invest_loan", async {
            request.validate()?;

            let mut uow = self.store.begin();
            let loan = uow
                .lock_loan(loan_id)
                .await?
                .ok_or(Error::LoanNotFound(loan_id))?;

            if !loan.status.accepts_investment() {
                return Err(Error::InvalidState {
                    loan_id,
                    status: loan.status,
                    operation: "invest in",
                });
            }

            let total = uow.sum_invested_amount(loan_id)?;
            let total_invested = match funded_total(loan_id, loan.principal, total, request.amount) {
                Err(e @ Error::Overfunded { .. }) => {
                    self.metrics.investments_overfunded.inc();
                    return Err(e);
                }
                other => other?,
            };

            let investment = uow.add_investment(loan_id, &request.investor_email, request.amount)?;

            let fully_funded =
                total_invested == loan.principal && loan.status != LoanStatus::Invested;

            let mut status = loan.status;
            let mut recipients = Vec::new();
            if fully_funded {
                status = uow
                    .update_loan_status(loan_id, LoanStatus::Invested, "fund")?
                    .status;
                recipients = distinct_investors(&uow.list_investments(loan_id)?);
            }

            uow.commit()?;
            self.metrics.investments_total.inc();

            tracing::info!(
                loan_id = %loan_id,
                amount = %request.amount,
                total_invested = %total_invested,
                "Investment recorded"
            );

            if fully_funded {
                self.metrics.loans_funded.inc();
                tracing::info!(
                    loan_id = %loan_id,
                    investors = recipients.len(),
                    "Loan fully funded"
                );

                // Committed above; delivery outcome no longer affects this call
                for investor in recipients {
                    self.notifications
                        .dispatch(FundedNotice { loan_id, investor });
                }
            }

            Ok(InvestmentReceipt {
                investment,
                total_invested,
                status,
                fully_funded,
            })
        })
        .await
    }

    /// Disburse an invested loan, attaching the signed agreement
    pub async fn disburse_loan(
        &self,
        loan_id: LoanId,
        request: DisbursementRequest,
    ) -> Result<Loan> {
        self.bounded("disburse_loan", async {
            request.validate()?;

            let mut uow = self.store.begin();
            let loan = uow
                .lock_loan(loan_id)
                .await?
                .ok_or(Error::LoanNotFound(loan_id))?;

            if loan.status != LoanStatus::Invested {
                return Err(Error::InvalidState {
                    loan_id,
                    status: loan.status,
                    operation: "disburse",
                });
            }

            uow.set_agreement_reference(loan_id, request.agreement_ref.trim())?;
            let loan = uow.update_loan_status(loan_id, LoanStatus::Disbursed, "disburse")?;
            uow.commit()?;

            self.metrics.loans_disbursed.inc();
            tracing::info!(
                loan_id = %loan_id,
                staff_id = %request.staff_id,
                disbursed_on = %request.disbursed_on,
                "Loan disbursed"
            );

            Ok(loan)
        })
        .await
    }

    /// Committed loan
    pub fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.store
            .get_loan_by_id(loan_id)?
            .ok_or(Error::LoanNotFound(loan_id))
    }

    /// Approval record, `None` while the loan is still proposed
    pub fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>> {
        self.get_loan(loan_id)?;
        self.store.get_approval(loan_id)
    }

    /// All investments of a loan in insertion order
    pub fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>> {
        self.get_loan(loan_id)?;
        self.store.list_investments(loan_id)
    }

    /// Funding position, read under the loan's row lock
    pub async fn funding_summary(&self, loan_id: LoanId) -> Result<FundingSummary> {
        self.bounded("funding_summary", async {
            let mut uow = self.store.begin();
            let loan = uow
                .lock_loan(loan_id)
                .await?
                .ok_or(Error::LoanNotFound(loan_id))?;

            let investments = uow.list_investments(loan_id)?;
            let total_invested: Decimal = investments.iter().map(|i| i.amount).sum();

            Ok(FundingSummary {
                loan_id,
                status: loan.status,
                principal: loan.principal,
                total_invested,
                remaining: loan.principal - total_invested,
                investor_count: distinct_investors(&investments).len(),
            })
        })
        .await
    }

    /// Wait until queued notices have been attempted
    pub async fn flush_notifications(&self) -> Result<()> {
        self.notifications.flush().await
    }

    /// Drain and stop the notification worker
    pub async fn shutdown(&self) -> Result<()> {
        self.notifications.flush().await?;
        self.notifications.shutdown().await
    }

    /// Run one operation under the deadline; a dropped future rolls its unit back
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} exceeded {:?}",
                operation, self.operation_timeout
            ))),
        };

        self.metrics
            .record_operation_duration(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::debug!(operation, error = %e, "Operation rejected");
        }

        result
    }
}

/// Exact `total + amount`, or `Overfunded` when it would pass `principal`.
///
/// `Decimal` arithmetic rounds once a result needs more than 28 digits, so the
/// sum is taken on mantissas widened to a common scale. A sum that fits under
/// the principal but cannot be stored without rounding is rejected as invalid.
fn funded_total(
    loan_id: LoanId,
    principal: Decimal,
    total: Decimal,
    amount: Decimal,
) -> Result<Decimal> {
    let scale = principal.scale().max(total.scale()).max(amount.scale());
    let widen = |d: Decimal| {
        10i128
            .checked_pow(scale - d.scale())
            .and_then(|factor| d.mantissa().checked_mul(factor))
    };
    let imprecise = || {
        Error::Validation(format!(
            "Investment of {} cannot be added exactly to total {}",
            amount, total
        ))
    };

    let (principal_m, total_m, amount_m) = match (widen(principal), widen(total), widen(amount)) {
        (Some(p), Some(t), Some(a)) => (p, t, a),
        _ => return Err(imprecise()),
    };
    let sum = total_m.checked_add(amount_m).ok_or_else(imprecise)?;

    if sum > principal_m {
        let remaining = Decimal::try_from_i128_with_scale(principal_m - total_m, scale)
            .unwrap_or(principal - total);
        return Err(Error::Overfunded {
            loan_id,
            amount,
            remaining,
        });
    }

    Decimal::try_from_i128_with_scale(sum, scale).map_err(|_| imprecise())
}

/// Investor addresses in first-investment order, each once
fn distinct_investors(investments: &[Investment]) -> Vec<String> {
    let mut seen = HashSet::new();
    investments
        .iter()
        .filter(|i| seen.insert(i.investor_email.as_str()))
        .map(|i| i.investor_email.clone())
        .collect()
}
