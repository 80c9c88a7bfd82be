//! In-memory storage backend
//!
//! Test double for [`LedgerBackend`]. Commits apply under one write lock so
//! readers see all of a write set or none of it. Commit failures can be
//! injected to exercise rollback paths.

use crate::{
    error::{Error, Result},
    storage::{LedgerBackend, Sequence, StorageStats, WriteSet},
    types::{Approval, Investment, Loan, LoanId},
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Tables {
    loans: BTreeMap<LoanId, Loan>,
    approvals: BTreeMap<LoanId, Approval>,
    investments: BTreeMap<LoanId, Vec<Investment>>,
    sequences: HashMap<Sequence, u64>,
}

/// Map-backed ledger storage
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without applying anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl LedgerBackend for MemoryStorage {
    fn next_id(&self, sequence: Sequence) -> Result<u64> {
        let mut tables = self.tables.write();
        let counter = tables.sequences.entry(sequence).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self.tables.read().loans.get(&id).cloned())
    }

    fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>> {
        Ok(self.tables.read().approvals.get(&loan_id).cloned())
    }

    fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>> {
        Ok(self
            .tables
            .read()
            .investments
            .get(&loan_id)
            .cloned()
            .unwrap_or_default())
    }

    fn commit(&self, writes: &WriteSet) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("Injected commit failure".to_string()));
        }

        let mut tables = self.tables.write();

        for loan in &writes.loans {
            tables.loans.insert(loan.id, loan.clone());
        }
        for approval in &writes.approvals {
            tables.approvals.insert(approval.loan_id, approval.clone());
        }
        for investment in &writes.investments {
            let list = tables.investments.entry(investment.loan_id).or_default();
            list.push(investment.clone());
            list.sort_by_key(|i| i.id);
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let tables = self.tables.read();
        Ok(StorageStats {
            total_loans: tables.loans.len() as u64,
            total_approvals: tables.approvals.len() as u64,
            total_investments: tables.investments.values().map(|v| v.len() as u64).sum(),
        })
    }
}
