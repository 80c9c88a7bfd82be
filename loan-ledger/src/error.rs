//! Error types for the loan ledger

use crate::types::{LoanId, LoanStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced loan does not exist
    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    /// Operation is not legal for the loan's current status
    #[error("Invalid state: cannot {operation} loan {loan_id} in status {status}")]
    InvalidState {
        /// Loan the operation targeted
        loan_id: LoanId,
        /// Status the loan was in
        status: LoanStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Investment would push the total past the principal
    #[error("Investment of {amount} exceeds remaining principal {remaining} for loan {loan_id}")]
    Overfunded {
        /// Loan the investment targeted
        loan_id: LoanId,
        /// Requested amount
        amount: Decimal,
        /// Amount still open for investment
        remaining: Decimal,
    },

    /// Storage error (RocksDB or backend failure)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (dispatcher mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Lock wait or operation deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by boundary layers to pick a client-facing status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller sent bad input
    Validation,
    /// Loan does not exist
    NotFound,
    /// Loan is in the wrong status
    InvalidState,
    /// Investment exceeds principal
    Overfunded,
    /// Anything the caller cannot fix
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::LoanNotFound(_) => ErrorKind::NotFound,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Overfunded { .. } => ErrorKind::Overfunded,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
