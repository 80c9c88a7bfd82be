//! Unit-of-work layer over a [`LedgerBackend`]
//!
//! A [`UnitOfWork`] stages writes in memory and applies them with one atomic
//! backend commit. Reads made through the unit see its own staged records
//! layered over committed state.
//!
//! `lock_loan` takes the loan's row lock (an async mutex in a sharded lock
//! table) and holds it until the unit is committed or dropped, so
//! read-validate-write sequences on one loan are linearized while different
//! loans proceed in parallel.
//!
//! Dropping a unit without calling [`UnitOfWork::commit`] discards everything
//! it staged. That covers errors, deadlines and cancelled futures alike.

use crate::{
    error::{Error, Result},
    storage::{LedgerBackend, Sequence, StorageStats, WriteSet},
    types::{
        Approval, ApprovalId, ApprovalRequest, Investment, InvestmentId, Loan, LoanId,
        LoanStatus, NewLoan,
    },
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<LoanId, Arc<Mutex<()>>>;

/// Ledger store: backend plus per-loan row locks
#[derive(Clone)]
pub struct LedgerStore {
    backend: Arc<dyn LedgerBackend>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl LedgerStore {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn LedgerBackend>, lock_timeout: Duration) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
            lock_timeout,
        }
    }

    /// Open a unit of work
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            store: self,
            held: Vec::new(),
            loans: BTreeMap::new(),
            approvals: Vec::new(),
            investments: Vec::new(),
            committed: false,
        }
    }

    /// Create a loan in its own unit of work
    pub fn create_loan(&self, new_loan: &NewLoan) -> Result<Loan> {
        let mut uow = self.begin();
        let loan = uow.create_loan(new_loan)?;
        uow.commit()?;
        Ok(loan)
    }

    /// Committed loan (`None` when absent)
    pub fn get_loan_by_id(&self, id: LoanId) -> Result<Option<Loan>> {
        self.backend.get_loan(id)
    }

    /// Committed approval of a loan
    pub fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>> {
        self.backend.get_approval(loan_id)
    }

    /// Committed investments of a loan
    pub fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>> {
        self.backend.list_investments(loan_id)
    }

    /// Committed investment total of a loan
    pub fn sum_invested_amount(&self, loan_id: LoanId) -> Result<Decimal> {
        self.backend.sum_invested(loan_id)
    }

    /// Backend statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.backend.stats()
    }

    /// Number of loans with a live lock entry
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn acquire(&self, loan_id: LoanId) -> Result<RowLock> {
        let mutex = self
            .locks
            .entry(loan_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        // Built before waiting so a timed-out wait still cleans the table entry
        let mut row_lock = RowLock {
            loan_id,
            table: self.locks.clone(),
            guard: None,
        };

        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Row lock on loan {} not acquired within {:?}",
                    loan_id, self.lock_timeout
                ))
            })?;

        row_lock.guard = Some(guard);
        Ok(row_lock)
    }
}

/// Held row lock; releases and prunes its table entry on drop
struct RowLock {
    loan_id: LoanId,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody holds or waits on it
        self.table
            .remove_if(&self.loan_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Scoped set of reads and staged writes, committed atomically
pub struct UnitOfWork<'s> {
    store: &'s LedgerStore,
    held: Vec<RowLock>,
    loans: BTreeMap<LoanId, Loan>,
    approvals: Vec<Approval>,
    investments: Vec<Investment>,
    committed: bool,
}

impl<'s> UnitOfWork<'s> {
    /// Take the loan's row lock, then read it (get-for-update)
    pub async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>> {
        if !self.held.iter().any(|lock| lock.loan_id == id) {
            let lock = self.store.acquire(id).await?;
            self.held.push(lock);
        }
        self.get_loan_by_id(id)
    }

    /// Stage a new loan in `proposed` status
    pub fn create_loan(&mut self, new_loan: &NewLoan) -> Result<Loan> {
        new_loan.validate()?;

        let now = Utc::now();
        let loan = Loan {
            id: LoanId(self.store.backend.next_id(Sequence::Loan)?),
            borrower_id: new_loan.borrower_id.trim().to_string(),
            principal: new_loan.principal,
            rate: new_loan.rate,
            roi: new_loan.roi,
            status: LoanStatus::Proposed,
            agreement_ref: None,
            created_at: now,
            updated_at: now,
        };

        tracing::debug!(loan_id = %loan.id, "Loan staged");
        self.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    /// Loan as this unit sees it (`None` when absent)
    pub fn get_loan_by_id(&self, id: LoanId) -> Result<Option<Loan>> {
        match self.loans.get(&id) {
            Some(loan) => Ok(Some(loan.clone())),
            None => self.store.backend.get_loan(id),
        }
    }

    /// Stage a one-step status change
    pub fn update_loan_status(
        &mut self,
        id: LoanId,
        status: LoanStatus,
        operation: &'static str,
    ) -> Result<Loan> {
        let mut loan = self.require_loan(id)?;
        loan.transition_to(status, operation)?;

        tracing::debug!(loan_id = %id, status = %status, "Status change staged");
        self.loans.insert(id, loan.clone());
        Ok(loan)
    }

    /// Stage the agreement document reference
    pub fn set_agreement_reference(&mut self, id: LoanId, reference: &str) -> Result<Loan> {
        let mut loan = self.require_loan(id)?;
        loan.agreement_ref = Some(reference.to_string());
        loan.updated_at = Utc::now();

        self.loans.insert(id, loan.clone());
        Ok(loan)
    }

    /// Stage the loan's approval record; a loan gets exactly one
    pub fn create_approval(&mut self, loan_id: LoanId, request: &ApprovalRequest) -> Result<Approval> {
        let loan = self.require_loan(loan_id)?;
        if self.get_approval(loan_id)?.is_some() {
            return Err(Error::InvalidState {
                loan_id,
                status: loan.status,
                operation: "approve",
            });
        }

        let approval = Approval {
            id: ApprovalId(self.store.backend.next_id(Sequence::Approval)?),
            loan_id,
            proof_ref: request.proof_ref.trim().to_string(),
            staff_id: request.staff_id.trim().to_string(),
            approved_on: request.approved_on,
            recorded_at: Utc::now(),
        };

        self.approvals.push(approval.clone());
        Ok(approval)
    }

    /// Approval as this unit sees it
    pub fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>> {
        if let Some(staged) = self.approvals.iter().find(|a| a.loan_id == loan_id) {
            return Ok(Some(staged.clone()));
        }
        self.store.backend.get_approval(loan_id)
    }

    /// Stage an investment record
    pub fn add_investment(
        &mut self,
        loan_id: LoanId,
        investor_email: &str,
        amount: Decimal,
    ) -> Result<Investment> {
        let investment = Investment {
            id: InvestmentId(self.store.backend.next_id(Sequence::Investment)?),
            loan_id,
            investor_email: investor_email.trim().to_string(),
            amount,
            invested_at: Utc::now(),
        };

        tracing::debug!(loan_id = %loan_id, amount = %amount, "Investment staged");
        self.investments.push(investment.clone());
        Ok(investment)
    }

    /// Investment total including staged investments
    pub fn sum_invested_amount(&self, loan_id: LoanId) -> Result<Decimal> {
        let staged: Decimal = self
            .investments
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .map(|i| i.amount)
            .sum();
        Ok(self.store.backend.sum_invested(loan_id)? + staged)
    }

    /// Investments including staged ones, in ID order
    pub fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>> {
        let mut all = self.store.backend.list_investments(loan_id)?;
        all.extend(
            self.investments
                .iter()
                .filter(|i| i.loan_id == loan_id)
                .cloned(),
        );
        all.sort_by_key(|i| i.id);
        Ok(all)
    }

    /// Apply every staged record atomically, then release row locks
    pub fn commit(mut self) -> Result<()> {
        let writes = WriteSet {
            loans: std::mem::take(&mut self.loans).into_values().collect(),
            approvals: std::mem::take(&mut self.approvals),
            investments: std::mem::take(&mut self.investments),
        };

        if !writes.is_empty() {
            if let Err(e) = self.store.backend.commit(&writes) {
                tracing::debug!(records = writes.len(), error = %e, "Unit of work rolled back");
                return Err(e);
            }
        }

        self.committed = true;
        Ok(())
    }

    /// Discard staged records and release row locks
    pub fn rollback(self) {
        drop(self);
    }

    fn require_loan(&self, id: LoanId) -> Result<Loan> {
        self.get_loan_by_id(id)?.ok_or(Error::LoanNotFound(id))
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed
            && !(self.loans.is_empty() && self.approvals.is_empty() && self.investments.is_empty())
        {
            tracing::debug!(
                loans = self.loans.len(),
                approvals = self.approvals.len(),
                investments = self.investments.len(),
                "Unit of work rolled back"
            );
        }
    }
}
