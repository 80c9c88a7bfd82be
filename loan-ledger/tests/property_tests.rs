//! Property-based tests for lifecycle invariants
//!
//! These tests use proptest to drive random operation sequences against the
//! engine and check them against a small reference model:
//! - Forward-only status: proposed → approved → invested → disbursed
//! - Funding cap: Σ(investments) ≤ principal
//! - Exactly-once funding: one transition and one notice per investor

use async_trait::async_trait;
use chrono::NaiveDate;
use loan_ledger::{
    ApprovalRequest, Config, DisbursementRequest, Error, InvestmentRequest, LifecycleEngine,
    LoanId, LoanStatus, MemoryStorage, NewLoan, Notifier, Result,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Default)]
struct CountingNotifier {
    sent: Mutex<Vec<(String, LoanId)>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify_funded(&self, investor: &str, loan_id: LoanId) -> Result<()> {
        self.sent.lock().push((investor.to_string(), loan_id));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Approve,
    Invest { investor: u8, amount: Decimal },
    Disburse,
}

/// Amounts mix coarse steps (so exact funding is common) with odd cents
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        3 => (1i64..=4).prop_map(|n| Decimal::new(n * 25, 0)),
        1 => (1i64..=5_000).prop_map(|cents| Decimal::new(cents, 2)),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Approve),
        6 => (0u8..4, amount_strategy()).prop_map(|(investor, amount)| Op::Invest { investor, amount }),
        1 => Just(Op::Disburse),
    ]
}

fn principal_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=8).prop_map(|n| Decimal::new(n * 25, 0))
}

fn approval() -> ApprovalRequest {
    ApprovalRequest {
        proof_ref: "p.jpg".to_string(),
        staff_id: "EMP1".to_string(),
        approved_on: NaiveDate::from_ymd_opt(2025, 6, 26).unwrap(),
    }
}

fn disbursement() -> DisbursementRequest {
    DisbursementRequest {
        agreement_ref: "http://x/doc.pdf".to_string(),
        staff_id: "EMP2".to_string(),
        disbursed_on: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
    }
}

fn email(investor: u8) -> String {
    format!("inv{}@x.com", investor)
}

/// Reference model of one loan
struct Model {
    status: LoanStatus,
    principal: Decimal,
    total: Decimal,
    investors: BTreeSet<String>,
    expected_notices: usize,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Engine agrees with the model on every operation outcome
    #[test]
    fn prop_engine_matches_lifecycle_model(
        principal in principal_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let notifier = Arc::new(CountingNotifier::default());
            let engine = LifecycleEngine::new(
                Arc::new(MemoryStorage::new()),
                notifier.clone(),
                &Config::default(),
            )
            .unwrap();

            let loan = engine
                .create_loan(NewLoan {
                    borrower_id: "BR1".to_string(),
                    principal,
                    rate: Decimal::new(10, 0),
                    roi: Decimal::new(5, 0),
                })
                .await
                .unwrap();

            let mut model = Model {
                status: LoanStatus::Proposed,
                principal,
                total: Decimal::ZERO,
                investors: BTreeSet::new(),
                expected_notices: 0,
            };

            for op in ops {
                let before = engine.get_loan(loan.id).unwrap().status;

                match op {
                    Op::Approve => {
                        let result = engine.approve_loan(loan.id, approval()).await;
                        if model.status == LoanStatus::Proposed {
                            prop_assert!(result.is_ok());
                            model.status = LoanStatus::Approved;
                        } else {
                            let is_invalid_state = matches!(result, Err(Error::InvalidState { .. }));
                            prop_assert!(is_invalid_state);
                        }
                    }
                    Op::Invest { investor, amount } => {
                        let result = engine
                            .invest_loan(loan.id, InvestmentRequest {
                                investor_email: email(investor),
                                amount,
                            })
                            .await;

                        if !model.status.accepts_investment() {
                            let is_invalid_state = matches!(result, Err(Error::InvalidState { .. }));
                            prop_assert!(is_invalid_state);
                        } else if model.total + amount > model.principal {
                            let is_overfunded = matches!(result, Err(Error::Overfunded { .. }));
                            prop_assert!(is_overfunded);
                        } else {
                            let receipt = result.unwrap();
                            model.total += amount;
                            model.investors.insert(email(investor));

                            let completes = model.total == model.principal
                                && model.status != LoanStatus::Invested;
                            prop_assert_eq!(receipt.fully_funded, completes);
                            prop_assert_eq!(receipt.total_invested, model.total);
                            if completes {
                                model.status = LoanStatus::Invested;
                                model.expected_notices = model.investors.len();
                            }
                        }
                    }
                    Op::Disburse => {
                        let result = engine.disburse_loan(loan.id, disbursement()).await;
                        if model.status == LoanStatus::Invested {
                            prop_assert!(result.is_ok());
                            model.status = LoanStatus::Disbursed;
                        } else {
                            let is_invalid_state = matches!(result, Err(Error::InvalidState { .. }));
                            prop_assert!(is_invalid_state);
                        }
                    }
                }

                let after = engine.get_loan(loan.id).unwrap().status;
                prop_assert_eq!(after, model.status);

                // Forward-only, one step at a time
                prop_assert!(after == before || before.next() == Some(after));

                let invested = engine.store().sum_invested_amount(loan.id).unwrap();
                prop_assert_eq!(invested, model.total);
                prop_assert!(invested <= principal);
            }

            engine.flush_notifications().await.unwrap();

            let funded = engine.metrics().loans_funded.get();
            let reached_invested = matches!(model.status, LoanStatus::Invested | LoanStatus::Disbursed);
            prop_assert_eq!(funded, u64::from(reached_invested));

            let sent = notifier.sent.lock().clone();
            prop_assert_eq!(sent.len(), model.expected_notices);
            let distinct: BTreeSet<_> = sent.iter().map(|(to, _)| to.clone()).collect();
            prop_assert_eq!(distinct.len(), sent.len());

            Ok(())
        })?;
    }

    /// Overfunded requests never leave a trace
    #[test]
    fn prop_overfunding_records_nothing(
        principal in principal_strategy(),
        excess in (1i64..=10_000).prop_map(|cents| Decimal::new(cents, 2)),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = LifecycleEngine::new(
                Arc::new(MemoryStorage::new()),
                Arc::new(CountingNotifier::default()),
                &Config::default(),
            )
            .unwrap();

            let loan = engine
                .create_loan(NewLoan {
                    borrower_id: "BR1".to_string(),
                    principal,
                    rate: Decimal::ONE,
                    roi: Decimal::ZERO,
                })
                .await
                .unwrap();
            engine.approve_loan(loan.id, approval()).await.unwrap();

            let result = engine
                .invest_loan(loan.id, InvestmentRequest {
                    investor_email: email(0),
                    amount: principal + excess,
                })
                .await;

            match result {
                Err(Error::Overfunded { remaining, .. }) => prop_assert_eq!(remaining, principal),
                other => prop_assert!(false, "expected overfunded, got {:?}", other.map(|r| r.total_invested)),
            }

            prop_assert!(engine.list_investments(loan.id).unwrap().is_empty());
            prop_assert_eq!(engine.get_loan(loan.id).unwrap().status, LoanStatus::Approved);

            Ok(())
        })?;
    }
}
