//! Test Data Builders
//!
//! Builders with sensible defaults so tests only spell out what they assert
//! on.

use chrono::NaiveDate;
use core_kernel::Money;

use domain_billing::{
    Bill, BillingConfig, BillingError, BillingService, NewBill, NewLineItem, PatientRef,
};

use crate::fixtures::{DateFixtures, LineItemFixtures, PatientFixtures};

/// Builder for bills
pub struct TestBillBuilder {
    patient: PatientRef,
    items: Vec<NewLineItem>,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
}

impl Default for TestBillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBillBuilder {
    /// A standard visit bill (230.00) for an outpatient
    pub fn new() -> Self {
        Self {
            patient: PatientFixtures::outpatient(),
            items: LineItemFixtures::standard_visit(),
            due_date: None,
            notes: None,
        }
    }

    pub fn with_patient(mut self, patient: PatientRef) -> Self {
        self.patient = patient;
        self
    }

    /// Replaces the items
    pub fn with_items(mut self, items: Vec<NewLineItem>) -> Self {
        self.items = items;
        self
    }

    /// Replaces the items with one per price
    pub fn with_prices(mut self, prices: &[Money]) -> Self {
        self.items = LineItemFixtures::priced(prices);
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Port-level insert request dated today
    pub fn build_new_bill(self) -> NewBill {
        NewBill {
            patient: self.patient,
            items: self.items,
            bill_date: DateFixtures::today(),
            due_date: self.due_date.unwrap_or_else(DateFixtures::due_in_30_days),
            notes: self.notes,
        }
    }

    /// Creates the bill through the service
    pub async fn create(self, service: &BillingService) -> Result<Bill, BillingError> {
        service
            .create_bill(self.patient, self.items, self.due_date, self.notes)
            .await
    }
}

/// In-memory service with a standard visit bill already created
pub async fn seeded_service() -> (BillingService, Bill) {
    let service = BillingService::in_memory(BillingConfig::default());
    let bill = TestBillBuilder::new()
        .create(&service)
        .await
        .expect("standard bill is valid");
    (service, bill)
}
