//! Comprehensive tests for domain_billing

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{BillId, Money, ReceiptId};

use domain_billing::{
    Bill, BillStatus, BillingConfig, BillingError, BillingService, ErrorKind, NewLineItem,
    PaymentMethod, PaymentRequest, ReceiptStatus, SelectionError,
};
use test_utils::{
    assert_audit_clean, assert_bill_consistent, assert_money_eq, assert_settled_exactly, seeded_service,
    LineItemFixtures, PatientFixtures, PaymentFixtures, TestBillBuilder,
};

fn service() -> BillingService {
    BillingService::in_memory(BillingConfig::default())
}

fn money(prices: &[Decimal]) -> Vec<Money> {
    prices.iter().copied().map(Money::new).collect()
}

fn items(prices: &[Decimal]) -> Vec<NewLineItem> {
    LineItemFixtures::priced(&money(prices))
}

async fn bill_with(service: &BillingService, prices: &[Decimal]) -> Bill {
    TestBillBuilder::new()
        .with_prices(&money(prices))
        .create(service)
        .await
        .unwrap()
}

fn pay(bill_id: BillId, indexes: &[usize]) -> PaymentRequest {
    PaymentFixtures::cash(bill_id, indexes)
}

fn set(indexes: &[usize]) -> BTreeSet<usize> {
    indexes.iter().copied().collect()
}

async fn assert_consistent(service: &BillingService, bill_id: BillId) {
    assert_audit_clean(&service.audit_bill(bill_id).await.unwrap());
    assert_bill_consistent(&service.get_bill(bill_id).await.unwrap());
}

// ============================================================================
// Bill Tests
// ============================================================================

mod bill_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_bill_defaults() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;

        assert_eq!(bill.total_amount.amount(), dec!(175));
        assert!(bill.paid_amount.is_zero());
        assert_eq!(bill.status, BillStatus::Pending);
        assert_eq!(bill.due_date, bill.bill_date + Days::new(30));
        assert!(bill.bill_number.starts_with("BILL-"));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_bill() {
        let result = TestBillBuilder::new().with_items(vec![]).create(&service()).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_non_positive_items() {
        let service = service();

        let zero_qty = vec![NewLineItem::new("Dressing", Money::new(dec!(10))).with_quantity(dec!(0))];
        let result = TestBillBuilder::new().with_items(zero_qty).create(&service).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

        let free = vec![NewLineItem::new("Dressing", Money::zero())];
        let result = TestBillBuilder::new().with_items(free).create(&service).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

        // Rounds to a zero total, so it could never be settled
        let sliver = vec![
            LineItemFixtures::consultation(),
            NewLineItem::new("Swab", Money::new(dec!(1))).with_quantity(dec!(0.00001)),
        ];
        let result = TestBillBuilder::new().with_items(sliver).create(&service).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

        let bill = TestBillBuilder::new().create(&service).await.unwrap();
        let sliver = vec![NewLineItem::new("Swab", Money::new(dec!(1))).with_quantity(dec!(0.00001))];
        let result = service.append_line_items(bill.id, sliver).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_create_rejects_due_date_in_past() {
        let yesterday = Utc::now().date_naive() - Days::new(1);
        let result = TestBillBuilder::new().with_due_date(yesterday).create(&service()).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_find_by_number_and_patient() {
        let service = service();
        let someone = PatientFixtures::with_visit();
        let bill = TestBillBuilder::new()
            .with_patient(someone.clone())
            .with_items(vec![LineItemFixtures::medication()])
            .with_notes("follow-up")
            .create(&service)
            .await
            .unwrap();
        assert_money_eq(&bill.total_amount, dec!(25));

        let found = service.find_bill_by_number(&bill.bill_number).await.unwrap();
        assert_eq!(found.id, bill.id);
        assert_eq!(found.notes.as_deref(), Some("follow-up"));

        let listed = service.list_bills_for_patient(someone.patient_id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_bill_is_not_found() {
        let service = service();
        let result = service.get_bill(BillId::new()).await;
        assert!(matches!(result, Err(BillingError::BillNotFound(_))));

        let result = service.append_line_items(BillId::new(), items(&[dec!(5)])).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);

        let result = service.list_receipts(BillId::new(), false).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }
}

// ============================================================================
// Payment Scenarios
// ============================================================================

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_a_pay_selected_items() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;

        let outcome = service.record_payment(pay(bill.id, &[0, 2])).await.unwrap();

        assert_eq!(outcome.receipt.amount.amount(), dec!(125));
        assert_eq!(outcome.receipt.settled_indexes, set(&[0, 2]));
        assert_eq!(outcome.bill.paid_amount.amount(), dec!(125));
        assert_eq!(outcome.bill.balance_amount.amount(), dec!(50));
        assert_eq!(outcome.bill.status, BillStatus::Partial);
        assert!(!outcome.replayed);

        let settlement = service.settlement(bill.id).await.unwrap();
        assert_eq!(settlement.settled, set(&[0, 2]));
        assert_eq!(settlement.outstanding, set(&[1]));
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test]
    async fn test_scenario_b_already_settled_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;
        service.record_payment(pay(bill.id, &[0, 2])).await.unwrap();

        let result = service.record_payment(pay(bill.id, &[0])).await;

        match result {
            Err(BillingError::Selection(e)) => {
                assert_eq!(e, SelectionError::AlreadySettled { index: 0 });
                assert!(e.to_string().contains("already settled"));
            }
            other => panic!("expected selection error, got {:?}", other),
        }

        // Nothing was written
        let bill = service.get_bill(bill.id).await.unwrap();
        assert_eq!(bill.paid_amount.amount(), dec!(125));
        assert_eq!(service.list_receipts(bill.id, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_auto_select_unpaid() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;
        service.record_payment(pay(bill.id, &[0, 2])).await.unwrap();

        let outcome = service.record_payment(pay(bill.id, &[])).await.unwrap();

        assert_eq!(outcome.receipt.settled_indexes, set(&[1]));
        assert_eq!(outcome.receipt.amount.amount(), dec!(50));
        assert_eq!(outcome.bill.paid_amount.amount(), dec!(175));
        assert!(outcome.bill.balance_amount.is_zero());
        assert_eq!(outcome.bill.status, BillStatus::Paid);
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test]
    async fn test_scenario_d_append_keeps_settlement() {
        let service = service();
        let bill = bill_with(&service, &[dec!(40), dec!(60)]).await;

        let updated = service.append_line_items(bill.id, items(&[dec!(30)])).await.unwrap();

        assert_eq!(updated.total_amount.amount(), dec!(130));
        assert_eq!(updated.balance_amount.amount(), dec!(130));
        assert_eq!(updated.line_items[2].index, 2);

        let settlement = service.settlement(bill.id).await.unwrap();
        assert!(settlement.settled.is_empty());
        assert_eq!(settlement.outstanding, set(&[0, 1, 2]));
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test]
    async fn test_scenario_d_append_after_payment() {
        let service = service();
        let bill = bill_with(&service, &[dec!(40), dec!(60)]).await;
        service.record_payment(pay(bill.id, &[0, 1])).await.unwrap();

        let updated = service.append_line_items(bill.id, items(&[dec!(30)])).await.unwrap();

        assert_eq!(updated.paid_amount.amount(), dec!(100));
        assert_eq!(updated.balance_amount.amount(), dec!(30));
        assert_eq!(updated.status, BillStatus::Partial);

        let settlement = service.settlement(bill.id).await.unwrap();
        assert_eq!(settlement.settled, set(&[0, 1]));
        assert_eq!(settlement.outstanding, set(&[2]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scenario_e_concurrent_payments_for_same_item() {
        let service = Arc::new(service());
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;

        let handles: Vec<_> = (0..2)
            .map(|n| {
                let service = Arc::clone(&service);
                let request = PaymentRequest::new(bill.id, PaymentMethod::Card, format!("cashier-{}", n))
                    .with_indexes([1]);
                tokio::spawn(async move { service.record_payment(request).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(
                    matches!(e.kind(), ErrorKind::Selection | ErrorKind::Concurrency),
                    "unexpected error {:?}",
                    e
                ),
            }
        }

        assert_eq!(successes, 1);
        let bill = service.get_bill(bill.id).await.unwrap();
        assert_eq!(bill.paid_amount.amount(), dec!(50));
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_payments_never_double_settle() {
        let service = Arc::new(service());
        let bill = bill_with(&service, &[dec!(10), dec!(20), dec!(30), dec!(40)]).await;

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let service = Arc::clone(&service);
                let index = n % 4;
                tokio::spawn(async move { service.record_payment(pay(bill.id, &[index])).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 4);
        let bill = service.get_bill(bill.id).await.unwrap();
        assert_eq!(bill.status, BillStatus::Paid);
        assert_consistent(&service, bill.id).await;
    }
}

// ============================================================================
// Amount Tests
// ============================================================================

mod amount_tests {
    use super::*;

    #[tokio::test]
    async fn test_out_of_range_index_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100)]).await;

        let result = service.record_payment(pay(bill.id, &[0, 4])).await;
        assert!(matches!(
            result,
            Err(BillingError::Selection(SelectionError::OutOfRange { index: 4, item_count: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_override_need_not_match_selection() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;

        let outcome = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(80))))
            .await
            .unwrap();

        assert_eq!(outcome.receipt.amount.amount(), dec!(80));
        assert_eq!(outcome.bill.balance_amount.amount(), dec!(70));
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test]
    async fn test_strict_mode_requires_matching_override() {
        let service = BillingService::in_memory(BillingConfig::strict());
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;

        let result = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(80))))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let outcome = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(100))))
            .await
            .unwrap();
        assert_eq!(outcome.receipt.amount.amount(), dec!(100));
    }

    #[tokio::test]
    async fn test_override_above_balance_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100)]).await;

        let result = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(100.01))))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let result = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::zero()))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(service.list_receipts(bill.id, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_general_payment_settles_nothing() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;
        service.record_payment(pay(bill.id, &[0, 1]).with_override(Money::new(dec!(120)))).await.unwrap();

        // Everything settled, 30 still owed: only an explicit amount can pay it
        let result = service.record_payment(pay(bill.id, &[])).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let outcome = service
            .record_payment(pay(bill.id, &[]).with_override(Money::new(dec!(30))))
            .await
            .unwrap();

        assert!(outcome.receipt.is_general_payment());
        assert_eq!(outcome.bill.status, BillStatus::Paid);
        assert_consistent(&service, bill.id).await;
    }

    #[tokio::test]
    async fn test_blank_cashier_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(10)]).await;
        let request = PaymentRequest::new(bill.id, PaymentMethod::Cash, "  ");
        assert!(matches!(service.record_payment(request).await, Err(BillingError::Validation(_))));
    }
}

// ============================================================================
// Reversal Tests
// ============================================================================

mod reversal_tests {
    use super::*;

    #[tokio::test]
    async fn test_void_releases_items_and_amount() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;
        let paid = service.record_payment(pay(bill.id, &[0, 2])).await.unwrap();

        let reversed = service.void_receipt(paid.receipt.id, "keyed on wrong bill").await.unwrap();

        assert_eq!(reversed.receipt.status, ReceiptStatus::Voided);
        assert_eq!(reversed.receipt.status_reason.as_deref(), Some("keyed on wrong bill"));
        assert!(reversed.bill.paid_amount.is_zero());
        assert_eq!(reversed.bill.status, BillStatus::Pending);

        let settlement = service.settlement(bill.id).await.unwrap();
        assert!(settlement.settled.is_empty());
        assert_consistent(&service, bill.id).await;

        // Items can be paid again
        service.record_payment(pay(bill.id, &[0])).await.unwrap();
    }

    #[tokio::test]
    async fn test_refund_then_void_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100)]).await;
        let paid = service.record_payment(pay(bill.id, &[0])).await.unwrap();

        service.refund_receipt(paid.receipt.id, "procedure cancelled").await.unwrap();
        let again = service.void_receipt(paid.receipt.id, "duplicate").await;

        assert!(matches!(again, Err(BillingError::Validation(_))));
        let bill = service.get_bill(bill.id).await.unwrap();
        assert!(bill.paid_amount.is_zero());
    }

    #[tokio::test]
    async fn test_reversal_requires_reason() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100)]).await;
        let paid = service.record_payment(pay(bill.id, &[0])).await.unwrap();

        let result = service.void_receipt(paid.receipt.id, " ").await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_receipt() {
        let result = service().void_receipt(ReceiptId::new(), "test").await;
        assert!(matches!(result, Err(BillingError::ReceiptNotFound(_))));
    }

    #[tokio::test]
    async fn test_active_only_listing() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;
        let first = service.record_payment(pay(bill.id, &[0])).await.unwrap();
        let second = service.record_payment(pay(bill.id, &[1])).await.unwrap();
        service.void_receipt(first.receipt.id, "wrong method").await.unwrap();

        let all = service.list_receipts(bill.id, false).await.unwrap();
        let active = service.list_receipts(bill.id, true).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.receipt.id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.receipt.id);
    }
}

// ============================================================================
// Idempotency Tests
// ============================================================================

mod idempotency_tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_returns_original_receipt() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;
        let request = pay(bill.id, &[0]).with_idempotency_key("till-7-0001");

        let first = service.record_payment(request.clone()).await.unwrap();
        let retry = service.record_payment(request).await.unwrap();

        assert!(!first.replayed);
        assert!(retry.replayed);
        assert_eq!(retry.receipt.id, first.receipt.id);
        assert_eq!(retry.bill.paid_amount.amount(), dec!(100));
        assert_eq!(service.list_receipts(bill.id, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_of_reversed_payment_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;
        let request = pay(bill.id, &[0]).with_idempotency_key("till-7-0002");

        let first = service.record_payment(request.clone()).await.unwrap();
        service.void_receipt(first.receipt.id, "card charge disputed").await.unwrap();

        let retry = service.record_payment(request).await;
        match retry {
            Err(BillingError::Validation(message)) => assert!(message.contains("voided")),
            other => panic!("expected validation error, got {:?}", other),
        }

        let bill = service.get_bill(bill.id).await.unwrap();
        assert!(bill.paid_amount.is_zero());
        assert_eq!(service.list_receipts(bill.id, true).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_selection_rejected() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50)]).await;
        service
            .record_payment(pay(bill.id, &[0]).with_idempotency_key("k"))
            .await
            .unwrap();

        let result = service
            .record_payment(pay(bill.id, &[1]).with_idempotency_key("k"))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let result = service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(1))).with_idempotency_key("k"))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}

// ============================================================================
// Projection Tests
// ============================================================================

mod projection_tests {
    use super::*;

    #[tokio::test]
    async fn test_line_items_with_settlement() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100), dec!(50), dec!(25)]).await;
        let paid = service.record_payment(pay(bill.id, &[1])).await.unwrap();

        let view = service.list_line_items_with_settlement(bill.id).await.unwrap();

        assert_eq!(view.len(), 3);
        assert_eq!(view.iter().filter(|row| row.settled).count(), 1);
        assert!(view[1].settled);
        assert_eq!(view[1].settled_by, Some(paid.receipt.id));
        assert_eq!(view[1].total_price.amount(), dec!(50));
        assert_eq!(view[0].name, "Service 1");
    }

    #[tokio::test]
    async fn test_audit_counts_general_payments() {
        let service = service();
        let bill = bill_with(&service, &[dec!(100)]).await;

        // The only item is settled for less than its price, leaving 40 owed
        service
            .record_payment(pay(bill.id, &[0]).with_override(Money::new(dec!(60))))
            .await
            .unwrap();
        let residual = service
            .record_payment(PaymentFixtures::general(bill.id, Money::new(dec!(40))))
            .await
            .unwrap();
        assert!(residual.receipt.is_general_payment());

        let audit = service.audit_bill(bill.id).await.unwrap();
        assert_audit_clean(&audit);
        assert_eq!(audit.general_payments, 1);
        assert_money_eq(&audit.receipts_total, dec!(100));
    }

    #[tokio::test]
    async fn test_seeded_visit_projection() {
        let (service, bill) = seeded_service().await;
        service.record_payment(pay(bill.id, &[0, 2])).await.unwrap();

        let view = service.list_line_items_with_settlement(bill.id).await.unwrap();
        assert_settled_exactly(&view, &[0, 2]);

        let bill = service.get_bill(bill.id).await.unwrap();
        assert_money_eq(&bill.balance_amount, dec!(50));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use test_utils::{index_subset_strategy, line_item_strategy, line_items_strategy};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_totals_hold_after_payments(
            initial in line_items_strategy(6),
            picks in prop::collection::vec(index_subset_strategy(8), 0..6),
            appended in prop::collection::vec(line_item_strategy(), 0..3),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let service = service();
                let bill = TestBillBuilder::new().with_items(initial).create(&service).await.unwrap();

                for (n, pick) in picks.into_iter().enumerate() {
                    // Failures are fine; only successful payments change state
                    let _ = service.record_payment(pay(bill.id, &pick.into_iter().collect::<Vec<_>>())).await;
                    if n == 1 && !appended.is_empty() {
                        service.append_line_items(bill.id, appended.clone()).await.unwrap();
                    }
                }

                assert_consistent(&service, bill.id).await;
            });
        }
    }
}
