//! Loan Ledger
//!
//! Loan lifecycle engine with funding accounting on an embedded RocksDB store.
//!
//! # Architecture
//!
//! - **Unit of Work**: Every operation stages its writes and commits them in one atomic batch
//! - **Row Locks**: Per-loan async mutexes linearize requests on the same loan
//! - **Exact Money**: Amounts are `Decimal`, so "fully funded" is exact equality
//! - **Notifications**: Funded notices go through a bounded queue after commit
//!
//! # Invariants
//!
//! - Forward-only status: proposed → approved → invested → disbursed
//! - Funding cap: Σ(investments) ≤ principal for every loan
//! - Exactly-once funding: one transition to invested per loan
//! - One approval record per loan

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    clippy::all
)]

pub mod types;
pub mod storage;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;
pub mod engine;
pub mod notify;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Approval, ApprovalId, ApprovalRequest, DisbursementRequest, FundingSummary, Investment,
    InvestmentId, InvestmentReceipt, InvestmentRequest, Loan, LoanId, LoanStatus, NewLoan,
};
pub use engine::LifecycleEngine;
pub use store::{LedgerStore, UnitOfWork};
pub use storage::{LedgerBackend, RocksStorage, StorageStats};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStorage;
pub use notify::{LogNotifier, Notifier};
pub use config::Config;
pub use metrics::Metrics;
