//! Custom Test Assertions
//!
//! Assertion helpers for billing types that report the bill number and the
//! offending amounts instead of a bare `assert_eq!` diff.

use rust_decimal::Decimal;
use std::collections::BTreeSet;

use core_kernel::Money;
use domain_billing::{Bill, LineItemView, ReconciliationAudit, Receipt};

/// Asserts a money amount equals a decimal value
pub fn assert_money_eq(actual: &Money, expected: Decimal) {
    assert_eq!(
        actual.amount(),
        expected,
        "Money mismatch: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts the aggregate invariants of a bill
///
/// # Panics
///
/// Panics if total differs from the item sum, balance differs from
/// total - paid, or the balance is negative
pub fn assert_bill_consistent(bill: &Bill) {
    let items_total = bill.items_total().expect("item totals overflow");
    assert_eq!(
        bill.total_amount, items_total,
        "Bill {} total {} does not match item sum {}",
        bill.bill_number, bill.total_amount, items_total
    );

    let expected_balance = bill.total_amount - bill.paid_amount;
    assert_eq!(
        bill.balance_amount, expected_balance,
        "Bill {} balance {} is not total - paid ({})",
        bill.bill_number, bill.balance_amount, expected_balance
    );
    assert!(
        !bill.balance_amount.is_negative(),
        "Bill {} has negative balance {}",
        bill.bill_number,
        bill.balance_amount
    );
}

/// Asserts an audit found nothing
pub fn assert_audit_clean(audit: &ReconciliationAudit) {
    assert!(
        audit.is_consistent(),
        "Bill {} failed reconciliation: discrepancies={:?}, anomalies={:?}",
        audit.bill_number,
        audit.discrepancies,
        audit.settlement.anomalies
    );
}

/// Asserts exactly `expected` are the settled positions of the projection
pub fn assert_settled_exactly(items: &[LineItemView], expected: &[usize]) {
    let settled: BTreeSet<usize> = items.iter().filter(|i| i.settled).map(|i| i.index).collect();
    let expected: BTreeSet<usize> = expected.iter().copied().collect();
    assert_eq!(settled, expected, "Settled line items differ");
}

/// Asserts no line item is claimed by two active receipts
pub fn assert_active_receipts_disjoint(receipts: &[Receipt]) {
    let mut seen = BTreeSet::new();
    for receipt in receipts.iter().filter(|r| r.is_active()) {
        for index in &receipt.settled_indexes {
            assert!(
                seen.insert(*index),
                "Line item {} settled twice (second time by {})",
                index,
                receipt.receipt_number
            );
        }
    }
}
