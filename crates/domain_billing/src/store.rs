//! In-memory bill store
//!
//! Owns the canonical [`Bill`] entities. Every method either applies its
//! whole change or leaves the stored bill untouched, so a caller holding the
//! store behind one lock gets all-or-nothing mutations.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

use core_kernel::{BillId, Money, PatientId};
use crate::bill::{document_number, Bill, NewLineItem, PatientRef};
use crate::error::BillingError;

/// Canonical store of bills
#[derive(Debug)]
pub struct BillStore {
    bills: HashMap<BillId, Bill>,
    /// bill_number -> id, enforces number uniqueness
    numbers: HashMap<String, BillId>,
    sequence: u64,
    prefix: String,
}

impl Default for BillStore {
    fn default() -> Self {
        Self::new("BILL")
    }
}

impl BillStore {
    /// Creates an empty store numbering bills with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            bills: HashMap::new(),
            numbers: HashMap::new(),
            sequence: 0,
            prefix: prefix.into(),
        }
    }

    /// Creates a bill dated today with zero paid amount
    ///
    /// # Errors
    ///
    /// Returns a validation error if `items` is empty or any item has a
    /// non-positive quantity or unit price.
    pub fn create(
        &mut self,
        patient: PatientRef,
        items: Vec<NewLineItem>,
        due_date: NaiveDate,
    ) -> Result<Bill, BillingError> {
        self.create_dated(patient, items, Utc::now().date_naive(), due_date, None)
    }

    /// Creates a bill with an explicit bill date and optional notes
    pub fn create_dated(
        &mut self,
        patient: PatientRef,
        items: Vec<NewLineItem>,
        bill_date: NaiveDate,
        due_date: NaiveDate,
        notes: Option<String>,
    ) -> Result<Bill, BillingError> {
        let sequence = self.sequence + 1;
        let number = document_number(&self.prefix, bill_date, sequence);
        if self.numbers.contains_key(&number) {
            return Err(BillingError::validation(format!("bill number {} already exists", number)));
        }

        let mut bill = Bill::new(number.clone(), patient, items, bill_date, due_date)?;
        bill.notes = notes;

        self.sequence = sequence;
        self.numbers.insert(number, bill.id);
        self.bills.insert(bill.id, bill.clone());
        Ok(bill)
    }

    /// Appends items to an existing bill
    pub fn append_line_items(
        &mut self,
        bill_id: &BillId,
        items: Vec<NewLineItem>,
    ) -> Result<Bill, BillingError> {
        self.mutate(bill_id, |bill| bill.append_items(items).map(|_| ()))
    }

    /// Returns a snapshot of the bill
    pub fn get(&self, bill_id: &BillId) -> Result<Bill, BillingError> {
        self.bills
            .get(bill_id)
            .cloned()
            .ok_or_else(|| BillingError::BillNotFound(bill_id.to_string()))
    }

    /// Looks a bill up by its human-readable number
    pub fn find_by_number(&self, bill_number: &str) -> Result<Bill, BillingError> {
        self.numbers
            .get(bill_number)
            .and_then(|id| self.bills.get(id))
            .cloned()
            .ok_or_else(|| BillingError::BillNotFound(bill_number.to_string()))
    }

    /// Bills raised for a patient, oldest first
    pub fn list_for_patient(&self, patient_id: &PatientId) -> Vec<Bill> {
        let mut bills: Vec<Bill> = self
            .bills
            .values()
            .filter(|bill| &bill.patient_id == patient_id)
            .cloned()
            .collect();
        bills.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.bill_number.cmp(&b.bill_number)));
        bills
    }

    /// Current version of a bill
    pub fn version_of(&self, bill_id: &BillId) -> Result<u64, BillingError> {
        self.bills
            .get(bill_id)
            .map(|bill| bill.version)
            .ok_or_else(|| BillingError::BillNotFound(bill_id.to_string()))
    }

    /// Records a payment of `amount`
    ///
    /// # Errors
    ///
    /// Validation error if `amount <= 0` or `amount > balance`.
    pub fn apply_payment(&mut self, bill_id: &BillId, amount: Money) -> Result<Bill, BillingError> {
        self.mutate(bill_id, |bill| bill.apply_payment(amount))
    }

    /// Takes `amount` back off the paid total
    pub fn reverse_payment(&mut self, bill_id: &BillId, amount: Money) -> Result<Bill, BillingError> {
        self.mutate(bill_id, |bill| bill.reverse_payment(amount))
    }

    pub fn len(&self) -> usize {
        self.bills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bills.is_empty()
    }

    /// Runs `change` on a copy and stores it only if the change succeeds
    fn mutate<F>(&mut self, bill_id: &BillId, change: F) -> Result<Bill, BillingError>
    where
        F: FnOnce(&mut Bill) -> Result<(), BillingError>,
    {
        let stored = self
            .bills
            .get_mut(bill_id)
            .ok_or_else(|| BillingError::BillNotFound(bill_id.to_string()))?;

        let mut updated = stored.clone();
        change(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn patient() -> PatientRef {
        PatientRef::new(PatientId::new(), "Kwame Mensah")
    }

    fn items(prices: &[rust_decimal::Decimal]) -> Vec<NewLineItem> {
        prices
            .iter()
            .map(|p| NewLineItem::new("Service", Money::new(*p)))
            .collect()
    }

    fn due() -> NaiveDate {
        Utc::now().date_naive() + chrono::Days::new(30)
    }

    #[test]
    fn test_create_assigns_unique_numbers() {
        let mut store = BillStore::new("BILL");
        let a = store.create(patient(), items(&[dec!(10)]), due()).unwrap();
        let b = store.create(patient(), items(&[dec!(20)]), due()).unwrap();

        assert_ne!(a.bill_number, b.bill_number);
        assert!(a.bill_number.starts_with("BILL-"));
        assert_eq!(store.find_by_number(&b.bill_number).unwrap().id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_rejects_empty_bill() {
        let mut store = BillStore::default();
        let result = store.create(patient(), vec![], due());
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_on_missing_bill() {
        let mut store = BillStore::default();
        let result = store.append_line_items(&BillId::new(), items(&[dec!(5)]));
        assert!(matches!(result, Err(BillingError::BillNotFound(_))));
    }

    #[test]
    fn test_failed_payment_leaves_bill_untouched() {
        let mut store = BillStore::default();
        let bill = store.create(patient(), items(&[dec!(100)]), due()).unwrap();

        let result = store.apply_payment(&bill.id, Money::new(dec!(150)));
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert_eq!(store.get(&bill.id).unwrap(), bill);

        let paid = store.apply_payment(&bill.id, Money::new(dec!(100))).unwrap();
        assert!(paid.balance_amount.is_zero());
        assert_eq!(store.version_of(&bill.id).unwrap(), bill.version + 1);
    }

    #[test]
    fn test_list_for_patient() {
        let mut store = BillStore::default();
        let someone = patient();
        store.create(someone.clone(), items(&[dec!(10)]), due()).unwrap();
        store.create(someone.clone(), items(&[dec!(10)]), due()).unwrap();
        store.create(patient(), items(&[dec!(10)]), due()).unwrap();

        assert_eq!(store.list_for_patient(&someone.patient_id).len(), 2);
    }
}
