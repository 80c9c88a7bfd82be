//! Core types for the loan ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Forward-only lifecycle transitions

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes (sort order == numeric order)
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

surrogate_id!(
    /// Loan identifier
    LoanId
);
surrogate_id!(
    /// Approval record identifier
    ApprovalId
);
surrogate_id!(
    /// Investment record identifier
    InvestmentId
);

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LoanStatus {
    /// Created, waiting for staff approval
    Proposed = 1,
    /// Approved, open for investment
    Approved = 2,
    /// Fully funded
    Invested = 3,
    /// Money handed to the borrower (terminal)
    Disbursed = 4,
}

impl LoanStatus {
    /// Lowercase status name
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Proposed => "proposed",
            LoanStatus::Approved => "approved",
            LoanStatus::Invested => "invested",
            LoanStatus::Disbursed => "disbursed",
        }
    }

    /// The only status this one may move to
    pub fn next(&self) -> Option<LoanStatus> {
        match self {
            LoanStatus::Proposed => Some(LoanStatus::Approved),
            LoanStatus::Approved => Some(LoanStatus::Invested),
            LoanStatus::Invested => Some(LoanStatus::Disbursed),
            LoanStatus::Disbursed => None,
        }
    }

    /// Check a single forward step
    pub fn can_transition_to(&self, target: LoanStatus) -> bool {
        self.next() == Some(target)
    }

    /// Investments are accepted while approved, and re-checked against the cap once invested
    pub fn accepts_investment(&self) -> bool {
        matches!(self, LoanStatus::Approved | LoanStatus::Invested)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "proposed" => Ok(LoanStatus::Proposed),
            "approved" => Ok(LoanStatus::Approved),
            "invested" => Ok(LoanStatus::Invested),
            "disbursed" => Ok(LoanStatus::Disbursed),
            other => Err(crate::Error::Validation(format!(
                "Unknown loan status: {}",
                other
            ))),
        }
    }
}

/// Loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    /// Surrogate ID
    pub id: LoanId,

    /// Borrower identifier
    pub borrower_id: String,

    /// Amount the loan raises from investors
    pub principal: Decimal,

    /// Interest rate charged to the borrower
    pub rate: Decimal,

    /// Return on investment paid to investors
    pub roi: Decimal,

    /// Lifecycle status
    pub status: LoanStatus,

    /// Signed agreement document (set at disbursement)
    pub agreement_ref: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last status or agreement change
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Move one step forward, rejecting anything else
    pub fn transition_to(&mut self, target: LoanStatus, operation: &'static str) -> crate::Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(crate::Error::InvalidState {
                loan_id: self.id,
                status: self.status,
                operation,
            });
        }

        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Approval record, written once at proposed -> approved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    /// Surrogate ID
    pub id: ApprovalId,

    /// Owning loan
    pub loan_id: LoanId,

    /// Proof-of-visit document handle
    pub proof_ref: String,

    /// Approving staff member
    pub staff_id: String,

    /// Approval date as supplied by staff
    pub approved_on: NaiveDate,

    /// When the record was written
    pub recorded_at: DateTime<Utc>,
}

/// Investment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    /// Surrogate ID
    pub id: InvestmentId,

    /// Owning loan
    pub loan_id: LoanId,

    /// Investor contact address
    pub investor_email: String,

    /// Invested amount
    pub amount: Decimal,

    /// Investment timestamp
    pub invested_at: DateTime<Utc>,
}

/// Create-loan request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoan {
    /// Borrower identifier
    pub borrower_id: String,
    /// Principal amount
    pub principal: Decimal,
    /// Interest rate
    pub rate: Decimal,
    /// Return on investment
    pub roi: Decimal,
}

impl NewLoan {
    /// Check loan terms
    pub fn validate(&self) -> crate::Result<()> {
        require_text("borrower_id", &self.borrower_id)?;

        if self.principal <= Decimal::ZERO {
            return Err(crate::Error::Validation(
                "Principal must be positive".to_string(),
            ));
        }
        if self.rate <= Decimal::ZERO {
            return Err(crate::Error::Validation("Rate must be positive".to_string()));
        }
        if self.roi < Decimal::ZERO {
            return Err(crate::Error::Validation(
                "ROI must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Approve-loan request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Proof-of-visit document handle
    pub proof_ref: String,
    /// Approving staff member
    pub staff_id: String,
    /// Approval date
    pub approved_on: NaiveDate,
}

impl ApprovalRequest {
    /// Check references are present
    pub fn validate(&self) -> crate::Result<()> {
        require_text("proof_ref", &self.proof_ref)?;
        require_text("staff_id", &self.staff_id)
    }
}

/// Invest request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentRequest {
    /// Investor contact address
    pub investor_email: String,
    /// Amount to invest
    pub amount: Decimal,
}

impl InvestmentRequest {
    /// Check amount and investor address
    pub fn validate(&self) -> crate::Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(crate::Error::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        let email = self.investor_email.trim();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(crate::Error::Validation(format!(
                "Invalid investor email: {:?}",
                self.investor_email
            )));
        }

        Ok(())
    }
}

/// Disburse request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    /// Signed agreement document
    pub agreement_ref: String,
    /// Staff member handing over the money
    pub staff_id: String,
    /// Disbursement date
    pub disbursed_on: NaiveDate,
}

impl DisbursementRequest {
    /// Check references are present
    pub fn validate(&self) -> crate::Result<()> {
        require_text("agreement_ref", &self.agreement_ref)?;
        require_text("staff_id", &self.staff_id)
    }
}

/// Outcome of a successful investment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentReceipt {
    /// Recorded investment
    pub investment: Investment,
    /// Total invested after this call
    pub total_invested: Decimal,
    /// Loan status after this call
    pub status: LoanStatus,
    /// True only for the call that completed funding
    pub fully_funded: bool,
}

/// Funding position of a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingSummary {
    /// Loan ID
    pub loan_id: LoanId,
    /// Current status
    pub status: LoanStatus,
    /// Principal amount
    pub principal: Decimal,
    /// Sum of all investments
    pub total_invested: Decimal,
    /// Amount that completes funding exactly
    pub remaining: Decimal,
    /// Number of distinct investors
    pub investor_count: usize,
}

fn require_text(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(crate::Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
