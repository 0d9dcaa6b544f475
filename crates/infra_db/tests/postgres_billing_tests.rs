//! Integration tests for the PostgreSQL billing adapter
//!
//! These start a PostgreSQL container and are ignored by default; run them
//! with `cargo test -p infra_db -- --ignored` on a machine with Docker.

use std::sync::Arc;

use core_kernel::{BillId, Money, PortError};
use domain_billing::{
    BillingConfig, BillingError, BillingPort, BillingService, NewReceipt, PaymentCommit,
    PaymentMethod, ReceiptStatus, ReversalCommit,
};
use infra_db::PostgresBillingAdapter;
use rust_decimal_macros::dec;
use test_utils::{
    assert_active_receipts_disjoint, assert_audit_clean, assert_bill_consistent, get_shared_test_database,
    PaymentFixtures, TestBillBuilder,
};

async fn adapter() -> PostgresBillingAdapter {
    let db = get_shared_test_database().await;
    PostgresBillingAdapter::new(db.pool().clone())
}

fn payment(bill_id: BillId, version: u64, amount: rust_decimal::Decimal, indexes: &[usize]) -> PaymentCommit {
    PaymentCommit {
        expected_version: version,
        receipt: NewReceipt {
            bill_id,
            amount: Money::new(amount),
            payment_method: PaymentMethod::Cash,
            settled_indexes: indexes.iter().copied().collect(),
            cashier: "front-desk".to_string(),
            notes: None,
            idempotency_key: None,
        },
    }
}

mod adapter_tests {
    use super::*;
    use core_kernel::HealthCheckable;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_create_and_reload_bill() {
        let adapter = adapter().await;
        let created = adapter
            .create_bill(TestBillBuilder::new().with_notes("follow-up in 2 weeks").build_new_bill(), None)
            .await
            .unwrap();

        assert!(created.bill_number.starts_with("BILL-"));

        let by_id = adapter.get_bill(created.id, None).await.unwrap();
        let by_number = adapter.find_bill_by_number(&created.bill_number, None).await.unwrap();
        assert_eq!(by_id.id, created.id);
        assert_eq!(by_number.id, created.id);
        assert_eq!(by_id.line_items.len(), 3);
        assert_eq!(by_id.notes.as_deref(), Some("follow-up in 2 weeks"));
        assert_bill_consistent(&by_id);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_unknown_bill_is_not_found() {
        let adapter = adapter().await;
        let result = adapter.get_bill(BillId::new(), None).await;
        assert!(matches!(result, Err(PortError::NotFound { ref entity_type, .. }) if entity_type == "Bill"));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_payment_commit_and_stale_version() {
        let adapter = adapter().await;
        let bill = adapter.create_bill(TestBillBuilder::new().build_new_bill(), None).await.unwrap();

        let (receipt, updated) = adapter
            .commit_payment(payment(bill.id, bill.version, dec!(100), &[0]), None)
            .await
            .unwrap();
        assert_eq!(updated.paid_amount.amount(), dec!(100));
        assert_eq!(updated.version, bill.version + 1);
        assert!(receipt.receipt_number.starts_with("RCT-"));

        // Same snapshot version again
        let stale = adapter
            .commit_payment(payment(bill.id, bill.version, dec!(50), &[1]), None)
            .await;
        assert!(matches!(stale, Err(PortError::Conflict { .. })));

        // Current version but an index already claimed
        let overlap = adapter
            .commit_payment(payment(bill.id, updated.version, dec!(100), &[0]), None)
            .await;
        assert!(matches!(overlap, Err(PortError::Conflict { .. })));

        assert_eq!(adapter.list_receipts(bill.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_reversal_restores_balance() {
        let adapter = adapter().await;
        let bill = adapter.create_bill(TestBillBuilder::new().build_new_bill(), None).await.unwrap();
        let (receipt, paid) = adapter
            .commit_payment(payment(bill.id, bill.version, dec!(150), &[0, 1]), None)
            .await
            .unwrap();

        let (voided, restored) = adapter
            .commit_reversal(
                ReversalCommit {
                    receipt_id: receipt.id,
                    expected_version: paid.version,
                    target: ReceiptStatus::Voided,
                    reason: "duplicate swipe".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(voided.status, ReceiptStatus::Voided);
        assert!(restored.paid_amount.is_zero());
        assert_eq!(restored.balance_amount, restored.total_amount);

        let stored = adapter.get_receipt(receipt.id, None).await.unwrap();
        assert_eq!(stored.status_reason.as_deref(), Some("duplicate swipe"));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_health_check() {
        let adapter = adapter().await;
        assert!(adapter.health_check().await.is_healthy());
    }
}

mod service_tests {
    use super::*;

    async fn service() -> BillingService {
        BillingService::new(Arc::new(adapter().await), BillingConfig::default())
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_full_payment_flow() {
        let service = service().await;
        let bill = TestBillBuilder::new().create(&service).await.unwrap();

        service.record_payment(PaymentFixtures::cash(bill.id, &[0, 2])).await.unwrap();
        service
            .append_line_items(bill.id, vec![test_utils::LineItemFixtures::medication()])
            .await
            .unwrap();
        let last = service.record_payment(PaymentFixtures::cash(bill.id, &[])).await.unwrap();

        assert_eq!(last.receipt.settled_indexes, [1, 3].into_iter().collect());
        assert!(last.bill.balance_amount.is_zero());
        assert_audit_clean(&service.audit_bill(bill.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires Docker"]
    async fn test_concurrent_payments_across_services() {
        // Two services model two API processes; only the database serializes them
        let first = service().await;
        let second = service().await;
        let bill_id = TestBillBuilder::new().create(&first).await.unwrap().id;

        let a = tokio::spawn({
            let s = first.clone();
            async move { s.record_payment(PaymentFixtures::cash(bill_id, &[0, 1])).await }
        });
        let b = tokio::spawn({
            let s = second.clone();
            async move { s.record_payment(PaymentFixtures::cash(bill_id, &[1, 2])).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        for result in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(result, BillingError::Concurrency(_) | BillingError::Selection(_)));
        }

        let receipts = first.list_receipts(bill_id, true).await.unwrap();
        assert_active_receipts_disjoint(&receipts);
        assert_bill_consistent(&first.get_bill(bill_id).await.unwrap());
    }
}
