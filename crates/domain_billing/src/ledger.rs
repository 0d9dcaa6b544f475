//! Receipt ledger
//!
//! This module keeps the append-only history of payment receipts per bill.
//! Receipts are never deleted or edited; a payment is undone by moving its
//! receipt to `Voided` or `Refunded`, after which it no longer counts
//! toward settlement.
//!
//! # Invariants
//!
//! - Receipts of a bill are listed in the order they were appended
//! - An idempotency key maps to at most one receipt per bill

use chrono::Utc;
use std::collections::HashMap;

use core_kernel::{BillId, ReceiptId};
use crate::bill::document_number;
use crate::error::BillingError;
use crate::receipt::{NewReceipt, Receipt, ReceiptStatus};

/// Append-only store of receipts
#[derive(Debug)]
pub struct ReceiptLedger {
    receipts: HashMap<ReceiptId, Receipt>,
    /// Receipt ids per bill in append order
    by_bill: HashMap<BillId, Vec<ReceiptId>>,
    idempotency: HashMap<(BillId, String), ReceiptId>,
    sequence: u64,
    prefix: String,
}

impl Default for ReceiptLedger {
    fn default() -> Self {
        Self::new("RCT")
    }
}

impl ReceiptLedger {
    /// Creates an empty ledger numbering receipts with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            receipts: HashMap::new(),
            by_bill: HashMap::new(),
            idempotency: HashMap::new(),
            sequence: 0,
            prefix: prefix.into(),
        }
    }

    /// Checks that `new` could be appended
    ///
    /// Split out so a caller can validate before mutating anything else.
    pub fn check_append(&self, new: &NewReceipt) -> Result<(), BillingError> {
        if let Some(key) = &new.idempotency_key {
            if self.idempotency.contains_key(&(new.bill_id, key.clone())) {
                return Err(BillingError::concurrency(format!(
                    "idempotency key '{}' already used on bill {}",
                    key, new.bill_id
                )));
            }
        }
        Ok(())
    }

    /// Appends an active receipt
    pub fn append(&mut self, new: NewReceipt) -> Result<Receipt, BillingError> {
        self.check_append(&new)?;

        self.sequence += 1;
        let number = document_number(&self.prefix, Utc::now().date_naive(), self.sequence);
        let receipt = Receipt::issue(number, new);

        if let Some(key) = &receipt.idempotency_key {
            self.idempotency.insert((receipt.bill_id, key.clone()), receipt.id);
        }
        self.by_bill.entry(receipt.bill_id).or_default().push(receipt.id);
        self.receipts.insert(receipt.id, receipt.clone());
        Ok(receipt)
    }

    /// Returns a receipt by id
    pub fn get(&self, receipt_id: &ReceiptId) -> Result<Receipt, BillingError> {
        self.receipts
            .get(receipt_id)
            .cloned()
            .ok_or_else(|| BillingError::ReceiptNotFound(receipt_id.to_string()))
    }

    /// All receipts of a bill, any status
    pub fn list(&self, bill_id: &BillId) -> Vec<Receipt> {
        self.by_bill
            .get(bill_id)
            .map(|ids| ids.iter().filter_map(|id| self.receipts.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Receipts of a bill that still count: excludes voided and refunded
    pub fn list_active(&self, bill_id: &BillId) -> Vec<Receipt> {
        self.list(bill_id).into_iter().filter(Receipt::is_active).collect()
    }

    /// Finds the receipt recorded under an idempotency key
    pub fn find_by_idempotency_key(&self, bill_id: &BillId, key: &str) -> Option<Receipt> {
        self.idempotency
            .get(&(*bill_id, key.to_string()))
            .and_then(|id| self.receipts.get(id))
            .cloned()
    }

    /// Marks a receipt voided
    ///
    /// Only the status changes here; reducing the bill's paid amount is the
    /// caller's job and must happen in the same critical section.
    pub fn void(&mut self, receipt_id: &ReceiptId, reason: &str) -> Result<Receipt, BillingError> {
        self.transition(receipt_id, ReceiptStatus::Voided, reason)
    }

    /// Marks a receipt refunded; same contract as [`ReceiptLedger::void`]
    pub fn refund(&mut self, receipt_id: &ReceiptId, reason: &str) -> Result<Receipt, BillingError> {
        self.transition(receipt_id, ReceiptStatus::Refunded, reason)
    }

    /// Applies `target` to an active receipt
    pub fn transition(
        &mut self,
        receipt_id: &ReceiptId,
        target: ReceiptStatus,
        reason: &str,
    ) -> Result<Receipt, BillingError> {
        let receipt = self
            .receipts
            .get_mut(receipt_id)
            .ok_or_else(|| BillingError::ReceiptNotFound(receipt_id.to_string()))?;

        receipt.reverse(target, reason)?;
        Ok(receipt.clone())
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Money;
    use rust_decimal_macros::dec;
    use crate::receipt::PaymentMethod;

    fn new_receipt(bill_id: BillId, indexes: &[usize], key: Option<&str>) -> NewReceipt {
        NewReceipt {
            bill_id,
            amount: Money::new(dec!(50)),
            payment_method: PaymentMethod::Card,
            settled_indexes: indexes.iter().copied().collect(),
            cashier: "cashier-2".to_string(),
            notes: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_append_and_list_in_order() {
        let mut ledger = ReceiptLedger::default();
        let bill_id = BillId::new();

        let first = ledger.append(new_receipt(bill_id, &[0], None)).unwrap();
        let second = ledger.append(new_receipt(bill_id, &[1], None)).unwrap();
        ledger.append(new_receipt(BillId::new(), &[0], None)).unwrap();

        let listed: Vec<_> = ledger.list(&bill_id).into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
        assert_ne!(first.receipt_number, second.receipt_number);
        assert!(first.receipt_number.starts_with("RCT-"));
    }

    #[test]
    fn test_list_active_excludes_voided_and_refunded() {
        let mut ledger = ReceiptLedger::default();
        let bill_id = BillId::new();

        let a = ledger.append(new_receipt(bill_id, &[0], None)).unwrap();
        let b = ledger.append(new_receipt(bill_id, &[1], None)).unwrap();
        let c = ledger.append(new_receipt(bill_id, &[2], None)).unwrap();

        ledger.void(&a.id, "duplicate entry").unwrap();
        ledger.refund(&b.id, "service not rendered").unwrap();

        let active: Vec<_> = ledger.list_active(&bill_id).into_iter().map(|r| r.id).collect();
        assert_eq!(active, vec![c.id]);
        assert_eq!(ledger.list(&bill_id).len(), 3);
    }

    #[test]
    fn test_void_twice_fails() {
        let mut ledger = ReceiptLedger::default();
        let receipt = ledger.append(new_receipt(BillId::new(), &[0], None)).unwrap();

        ledger.void(&receipt.id, "error").unwrap();
        assert!(matches!(
            ledger.refund(&receipt.id, "error"),
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            ledger.void(&ReceiptId::new(), "missing"),
            Err(BillingError::ReceiptNotFound(_))
        ));
    }

    #[test]
    fn test_idempotency_key_is_unique_per_bill() {
        let mut ledger = ReceiptLedger::default();
        let bill_id = BillId::new();

        let receipt = ledger.append(new_receipt(bill_id, &[0], Some("attempt-1"))).unwrap();
        assert_eq!(
            ledger.find_by_idempotency_key(&bill_id, "attempt-1").map(|r| r.id),
            Some(receipt.id)
        );

        let duplicate = ledger.append(new_receipt(bill_id, &[1], Some("attempt-1")));
        assert!(matches!(duplicate, Err(BillingError::Concurrency(_))));

        // Same key on another bill is a different request
        assert!(ledger.append(new_receipt(BillId::new(), &[0], Some("attempt-1"))).is_ok());
    }
}
