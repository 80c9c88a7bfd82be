//! Funded-loan notifications
//!
//! The engine hands notices to a dispatcher after the funding transition has
//! committed. A single worker task drains a bounded queue and calls the
//! [`Notifier`] once per notice:
//!
//! ```text
//! LifecycleEngine ──try_send──▶ mpsc (bounded) ──▶ NotificationWorker ──▶ Notifier
//! ```
//!
//! Delivery is at-most-once with no retry. A full or closed queue drops the
//! notice. Failures are logged and counted, never reported to the engine.

use crate::{
    error::{Error, Result},
    metrics::Metrics,
    types::LoanId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Delivery channel for "fully funded" notices
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell one investor that a loan is fully funded
    async fn notify_funded(&self, investor: &str, loan_id: LoanId) -> Result<()>;
}

/// Notifier that records the notice as a log line
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_funded(&self, investor: &str, loan_id: LoanId) -> Result<()> {
        tracing::info!(
            to = investor,
            subject = %format!("Loan #{} has been fully funded", loan_id),
            body = "Thank you for your investment. The agreement letter will be sent soon.",
            "Funded notice sent"
        );
        Ok(())
    }
}

/// One queued notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedNotice {
    /// Loan that reached full funding
    pub loan_id: LoanId,
    /// Investor address
    pub investor: String,
}

/// Message sent to the notification worker
pub enum DispatchMessage {
    /// Deliver a notice
    Funded(FundedNotice),

    /// Answer once every earlier notice has been attempted
    Flush {
        response: oneshot::Sender<()>,
    },

    /// Stop after draining earlier messages
    Shutdown,
}

/// Worker that performs deliveries
pub struct NotificationWorker {
    notifier: Arc<dyn Notifier>,
    mailbox: mpsc::Receiver<DispatchMessage>,
    metrics: Metrics,
}

impl NotificationWorker {
    /// Run the worker loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                DispatchMessage::Funded(notice) => self.deliver(notice).await,
                DispatchMessage::Flush { response } => {
                    let _ = response.send(());
                }
                DispatchMessage::Shutdown => break,
            }
        }

        tracing::debug!("Notification worker stopped");
    }

    async fn deliver(&self, notice: FundedNotice) {
        match self
            .notifier
            .notify_funded(&notice.investor, notice.loan_id)
            .await
        {
            Ok(()) => self.metrics.notifications_sent.inc(),
            Err(e) => {
                self.metrics.notifications_failed.inc();
                tracing::warn!(
                    loan_id = %notice.loan_id,
                    investor = %notice.investor,
                    error = %e,
                    "Funded notice delivery failed"
                );
            }
        }
    }
}

/// Handle for queueing notices
#[derive(Clone)]
pub struct NotificationHandle {
    sender: mpsc::Sender<DispatchMessage>,
    metrics: Metrics,
}

impl NotificationHandle {
    /// Queue a notice without waiting; drops it if the queue is full or closed
    pub fn dispatch(&self, notice: FundedNotice) {
        if let Err(e) = self.sender.try_send(DispatchMessage::Funded(notice)) {
            self.metrics.notifications_dropped.inc();
            let (reason, notice) = match e {
                mpsc::error::TrySendError::Full(msg) => ("queue full", msg),
                mpsc::error::TrySendError::Closed(msg) => ("queue closed", msg),
            };
            if let DispatchMessage::Funded(notice) = notice {
                tracing::warn!(
                    loan_id = %notice.loan_id,
                    investor = %notice.investor,
                    reason,
                    "Funded notice dropped"
                );
            }
        }
    }

    /// Wait until every notice queued so far has been attempted
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchMessage::Flush { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Notification mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Flush response channel closed".to_string()))
    }

    /// Stop the worker once queued notices are drained
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DispatchMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Notification mailbox closed".to_string()))
    }
}

/// Spawn the notification worker
pub fn spawn_notification_worker(
    notifier: Arc<dyn Notifier>,
    queue_capacity: usize,
    metrics: Metrics,
) -> NotificationHandle {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let worker = NotificationWorker {
        notifier,
        mailbox: rx,
        metrics: metrics.clone(),
    };

    tokio::spawn(async move {
        worker.run().await;
    });

    NotificationHandle { sender: tx, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<FundedNotice>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify_funded(&self, investor: &str, loan_id: LoanId) -> Result<()> {
            self.seen.lock().push(FundedNotice {
                loan_id,
                investor: investor.to_string(),
            });
            if investor.starts_with("bounce") {
                return Err(Error::Notification("mailbox full".to_string()));
            }
            Ok(())
        }
    }

    /// Blocks every delivery until released
    struct Stalled {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl Notifier for Stalled {
        async fn notify_funded(&self, _investor: &str, _loan_id: LoanId) -> Result<()> {
            let _permit = self.gate.acquire().await;
            Ok(())
        }
    }

    fn notice(investor: &str) -> FundedNotice {
        FundedNotice {
            loan_id: LoanId(1),
            investor: investor.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_and_flush() {
        let notifier = Arc::new(Recording::default());
        let metrics = Metrics::new().unwrap();
        let handle = spawn_notification_worker(notifier.clone(), 16, metrics.clone());

        handle.dispatch(notice("a@x.com"));
        handle.dispatch(notice("b@x.com"));
        handle.flush().await.unwrap();

        let seen = notifier.seen.lock().clone();
        assert_eq!(seen, vec![notice("a@x.com"), notice("b@x.com")]);
        assert_eq!(metrics.notifications_sent.get(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let notifier = Arc::new(Recording::default());
        let metrics = Metrics::new().unwrap();
        let handle = spawn_notification_worker(notifier.clone(), 16, metrics.clone());

        handle.dispatch(notice("bounce@x.com"));
        handle.dispatch(notice("c@x.com"));
        handle.flush().await.unwrap();

        // Worker survived the failure and kept delivering, no retry
        assert_eq!(notifier.seen.lock().len(), 2);
        assert_eq!(metrics.notifications_failed.get(), 1);
        assert_eq!(metrics.notifications_sent.get(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_notice() {
        let notifier = Arc::new(Stalled {
            gate: tokio::sync::Semaphore::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let handle = spawn_notification_worker(notifier.clone(), 1, metrics.clone());

        // First notice is picked up and stalls the worker
        handle.dispatch(notice("a@x.com"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second fills the single slot, third is dropped
        handle.dispatch(notice("b@x.com"));
        handle.dispatch(notice("c@x.com"));
        assert_eq!(metrics.notifications_dropped.get(), 1);

        notifier.gate.add_permits(10);
        handle.flush().await.unwrap();
        assert_eq!(metrics.notifications_sent.get(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_drops() {
        let metrics = Metrics::new().unwrap();
        let handle = spawn_notification_worker(Arc::new(LogNotifier), 4, metrics.clone());

        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.dispatch(notice("late@x.com"));
        assert_eq!(metrics.notifications_dropped.get(), 1);
        assert!(handle.flush().await.is_err());
    }
}
