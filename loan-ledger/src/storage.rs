//! Storage layer
//!
//! [`LedgerBackend`] is the raw persistence capability the unit-of-work layer
//! builds on. [`RocksStorage`] is the production adapter; the in-memory double
//! lives in [`crate::memory`].
//!
//! # Column Families
//!
//! - `loans` - Loan records (key: loan_id)
//! - `approvals` - Approval records (key: loan_id || approval_id)
//! - `investments` - Investment records (key: loan_id || investment_id)
//! - `sequences` - Surrogate ID counters (key: sequence name)

use crate::{
    error::{Error, Result},
    types::{Approval, Investment, Loan, LoanId},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;

/// Column family names
const CF_LOANS: &str = "loans";
const CF_APPROVALS: &str = "approvals";
const CF_INVESTMENTS: &str = "investments";
const CF_SEQUENCES: &str = "sequences";

/// Surrogate ID sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    /// Loan IDs
    Loan,
    /// Approval IDs
    Approval,
    /// Investment IDs
    Investment,
}

impl Sequence {
    fn key(&self) -> &'static [u8] {
        match self {
            Sequence::Loan => b"loan",
            Sequence::Approval => b"approval",
            Sequence::Investment => b"investment",
        }
    }
}

/// Records staged by one unit of work, applied in a single atomic write
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    /// New or updated loans
    pub loans: Vec<Loan>,
    /// New approvals
    pub approvals: Vec<Approval>,
    /// New investments
    pub investments: Vec<Investment>,
}

impl WriteSet {
    /// True when nothing is staged
    pub fn is_empty(&self) -> bool {
        self.loans.is_empty() && self.approvals.is_empty() && self.investments.is_empty()
    }

    /// Number of staged records
    pub fn len(&self) -> usize {
        self.loans.len() + self.approvals.len() + self.investments.len()
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Loan records
    pub total_loans: u64,
    /// Approval records
    pub total_approvals: u64,
    /// Investment records
    pub total_investments: u64,
}

/// Persistence capability consumed by the unit-of-work layer
///
/// Reads only ever see committed data. `commit` must apply the whole write set
/// or nothing.
pub trait LedgerBackend: Send + Sync {
    /// Allocate the next surrogate ID. Allocation is durable and never rolled back.
    fn next_id(&self, sequence: Sequence) -> Result<u64>;

    /// Get loan by ID (`None` when absent)
    fn get_loan(&self, id: LoanId) -> Result<Option<Loan>>;

    /// Get the approval of a loan
    fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>>;

    /// All investments of a loan, ordered by investment ID
    fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>>;

    /// Sum of investment amounts of a loan
    fn sum_invested(&self, loan_id: LoanId) -> Result<Decimal> {
        Ok(self
            .list_investments(loan_id)?
            .iter()
            .map(|i| i.amount)
            .sum())
    }

    /// Atomically apply a write set
    fn commit(&self, writes: &WriteSet) -> Result<()>;

    /// Approximate record counts
    fn stats(&self) -> Result<StorageStats>;
}

/// RocksDB-backed ledger storage
pub struct RocksStorage {
    db: DB,
    sequence_lock: Mutex<()>,
}

impl RocksStorage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOANS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_APPROVALS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_INVESTMENTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_SEQUENCES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened loan ledger RocksDB");

        Ok(Self {
            db,
            sequence_lock: Mutex::new(()),
        })
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Records are read on every operation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Decode every value stored under `loan_id || *`
    fn scan_loan_prefix<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        loan_id: LoanId,
    ) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = loan_id.to_key();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }

    fn child_key(loan_id: LoanId, record_id: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&loan_id.to_key());
        key[8..].copy_from_slice(&record_id.to_be_bytes());
        key
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

impl LedgerBackend for RocksStorage {
    fn next_id(&self, sequence: Sequence) -> Result<u64> {
        let _guard = self.sequence_lock.lock();
        let cf = self.cf_handle(CF_SEQUENCES)?;

        let current = match self.db.get_cf(cf, sequence.key())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Storage(format!("Corrupt sequence value for {:?}", sequence))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };

        let next = current + 1;
        self.db.put_cf(cf, sequence.key(), next.to_be_bytes())?;

        Ok(next)
    }

    fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let cf = self.cf_handle(CF_LOANS)?;

        match self.db.get_cf(cf, id.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>> {
        let approvals: Vec<Approval> = self.scan_loan_prefix(CF_APPROVALS, loan_id)?;
        Ok(approvals.into_iter().next())
    }

    fn list_investments(&self, loan_id: LoanId) -> Result<Vec<Investment>> {
        self.scan_loan_prefix(CF_INVESTMENTS, loan_id)
    }

    fn commit(&self, writes: &WriteSet) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_loans = self.cf_handle(CF_LOANS)?;
        for loan in &writes.loans {
            batch.put_cf(cf_loans, loan.id.to_key(), bincode::serialize(loan)?);
        }

        let cf_approvals = self.cf_handle(CF_APPROVALS)?;
        for approval in &writes.approvals {
            let key = Self::child_key(approval.loan_id, approval.id.0);
            batch.put_cf(cf_approvals, key, bincode::serialize(approval)?);
        }

        let cf_investments = self.cf_handle(CF_INVESTMENTS)?;
        for investment in &writes.investments {
            let key = Self::child_key(investment.loan_id, investment.id.0);
            batch.put_cf(cf_investments, key, bincode::serialize(investment)?);
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(records = writes.len(), "Write set committed");

        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_loans: self.approximate_count(self.cf_handle(CF_LOANS)?)?,
            total_approvals: self.approximate_count(self.cf_handle(CF_APPROVALS)?)?,
            total_investments: self.approximate_count(self.cf_handle(CF_INVESTMENTS)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalId, InvestmentId, LoanStatus};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn test_loan(id: u64) -> Loan {
        Loan {
            id: LoanId(id),
            borrower_id: "BR123".to_string(),
            principal: dec!(1000000),
            rate: dec!(10),
            roi: dec!(5),
            status: LoanStatus::Approved,
            agreement_ref: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_investment(loan_id: u64, id: u64, amount: Decimal) -> Investment {
        Investment {
            id: InvestmentId(id),
            loan_id: LoanId(loan_id),
            investor_email: format!("inv{}@x.com", id),
            amount,
            invested_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_LOANS).is_some());
        assert!(storage.db.cf_handle(CF_SEQUENCES).is_some());
    }

    #[test]
    fn test_commit_and_get_loan() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();

        let loan = test_loan(1);
        storage
            .commit(&WriteSet {
                loans: vec![loan.clone()],
                ..Default::default()
            })
            .unwrap();

        let retrieved = storage.get_loan(LoanId(1)).unwrap().unwrap();
        assert_eq!(retrieved, loan);
        assert!(storage.get_loan(LoanId(2)).unwrap().is_none());
    }

    #[test]
    fn test_investments_scoped_to_loan() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();

        // Scans for loan 1 must stop before loan 2's and loan 256's keys
        let writes = WriteSet {
            loans: vec![test_loan(1), test_loan(2), test_loan(256)],
            approvals: vec![],
            investments: vec![
                test_investment(1, 1, dec!(100)),
                test_investment(2, 2, dec!(50)),
                test_investment(1, 3, dec!(250.50)),
                test_investment(256, 4, dec!(7)),
            ],
        };
        storage.commit(&writes).unwrap();

        let invs = storage.list_investments(LoanId(1)).unwrap();
        assert_eq!(invs.len(), 2);
        assert_eq!(invs[0].id, InvestmentId(1));
        assert_eq!(invs[1].id, InvestmentId(3));
        assert_eq!(storage.sum_invested(LoanId(1)).unwrap(), dec!(350.50));
        assert_eq!(storage.sum_invested(LoanId(2)).unwrap(), dec!(50));
        assert_eq!(storage.sum_invested(LoanId(3)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_approval_lookup() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();

        let approval = Approval {
            id: ApprovalId(9),
            loan_id: LoanId(4),
            proof_ref: "p.jpg".to_string(),
            staff_id: "EMP1".to_string(),
            approved_on: NaiveDate::from_ymd_opt(2025, 6, 26).unwrap(),
            recorded_at: Utc::now(),
        };
        storage
            .commit(&WriteSet {
                approvals: vec![approval.clone()],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(storage.get_approval(LoanId(4)).unwrap(), Some(approval));
        assert_eq!(storage.get_approval(LoanId(5)).unwrap(), None);
    }

    #[test]
    fn test_sequences_survive_reopen() {
        let (config, _temp) = test_config();

        {
            let storage = RocksStorage::open(&config).unwrap();
            assert_eq!(storage.next_id(Sequence::Loan).unwrap(), 1);
            assert_eq!(storage.next_id(Sequence::Loan).unwrap(), 2);
            assert_eq!(storage.next_id(Sequence::Investment).unwrap(), 1);
        }

        let storage = RocksStorage::open(&config).unwrap();
        assert_eq!(storage.next_id(Sequence::Loan).unwrap(), 3);
        assert_eq!(storage.next_id(Sequence::Approval).unwrap(), 1);
    }
}
