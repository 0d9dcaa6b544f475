//! Bills and their line items
//!
//! A bill is an append-only sequence of line items plus aggregate amounts.
//! A line item's position in the sequence is its identity for settlement:
//! receipts refer to items by index, so items are never reordered or removed.
//!
//! # Invariants
//!
//! - `total_amount` equals the sum of every line item's `total_price`
//! - `balance_amount` equals `total_amount - paid_amount` and is never negative
//! - `status` is derived from the amounts and the due date, never set directly

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use core_kernel::{BillId, Money, PatientId, ServiceId, VisitId};
use crate::error::BillingError;

/// Derived payment status of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    /// Nothing paid yet
    Pending,
    /// Nothing paid and past the due date
    Overdue,
    /// Partial payment received
    Partial,
    /// Fully paid
    Paid,
}

impl BillStatus {
    /// Derives the status from paid/total amounts and the due date
    pub fn derive(paid: Money, total: Money, due_date: NaiveDate, today: NaiveDate) -> Self {
        if paid >= total {
            BillStatus::Paid
        } else if paid.is_positive() {
            BillStatus::Partial
        } else if today > due_date {
            BillStatus::Overdue
        } else {
            BillStatus::Pending
        }
    }

    /// Returns the snake_case name stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Overdue => "overdue",
            BillStatus::Partial => "partial",
            BillStatus::Paid => "paid",
        }
    }
}

/// Who the bill is for, as supplied by patient/visit records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRef {
    pub patient_id: PatientId,
    pub patient_name: String,
    /// Visit that produced the charges, if any
    pub visit_id: Option<VisitId>,
}

impl PatientRef {
    pub fn new(patient_id: PatientId, patient_name: impl Into<String>) -> Self {
        Self {
            patient_id,
            patient_name: patient_name.into(),
            visit_id: None,
        }
    }

    /// Links the bill to the visit it was raised for
    pub fn with_visit(mut self, visit_id: VisitId) -> Self {
        self.visit_id = Some(visit_id);
        self
    }
}

/// Decimal places a quantity may carry; matches the `NUMERIC(18,4)` column
pub const QUANTITY_SCALE: u32 = 4;

/// A line item to be added to a bill, in canonical shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub service_id: Option<ServiceId>,
}

impl NewLineItem {
    /// Creates a single-quantity line item
    pub fn new(name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            name: name.into(),
            quantity: Decimal::ONE,
            unit_price,
            service_id: None,
        }
    }

    /// Sets the quantity
    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    /// Links the item to a catalog service
    pub fn with_service(mut self, service_id: ServiceId) -> Self {
        self.service_id = Some(service_id);
        self
    }

    /// Checks name, quantity and unit price
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.name.trim().is_empty() {
            return Err(BillingError::validation("line item name must not be empty"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "line item '{}' has non-positive quantity {}",
                self.name, self.quantity
            )));
        }
        if self.quantity.normalize().scale() > QUANTITY_SCALE {
            return Err(BillingError::validation(format!(
                "line item '{}' quantity {} has more than {} decimal places",
                self.name, self.quantity, QUANTITY_SCALE
            )));
        }
        if !self.unit_price.is_positive() {
            return Err(BillingError::validation(format!(
                "line item '{}' has non-positive unit price {}",
                self.name, self.unit_price
            )));
        }
        // An item that totals zero could never be settled on its own
        let total = self.total_price()?;
        if !total.is_positive() {
            return Err(BillingError::validation(format!(
                "line item '{}' totals {}; quantity {} is too small for unit price {}",
                self.name, total, self.quantity, self.unit_price
            )));
        }
        Ok(())
    }

    /// quantity × unit price
    pub fn total_price(&self) -> Result<Money, BillingError> {
        Ok(self.unit_price.checked_mul(self.quantity)?)
    }

    fn into_line_item(self, index: usize, added_at: DateTime<Utc>) -> Result<LineItem, BillingError> {
        self.validate()?;
        let total_price = self.total_price()?;
        Ok(LineItem {
            index,
            name: self.name.trim().to_string(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_price,
            service_id: self.service_id,
            added_at,
        })
    }
}

/// A billed line item; `index` is its permanent position on the bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub index: usize,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub total_price: Money,
    pub service_id: Option<ServiceId>,
    pub added_at: DateTime<Utc>,
}

/// A patient bill
///
/// Fields are public so adapters can rebuild bills from storage. Mutation
/// goes through [`Bill::append_items`], [`Bill::apply_payment`] and
/// [`Bill::reverse_payment`], which keep the aggregates consistent and bump
/// `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    /// Unique identifier
    pub id: BillId,
    /// Bill number (human-readable, unique)
    pub bill_number: String,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub visit_id: Option<VisitId>,
    /// Append-only; position equals `LineItem::index`
    pub line_items: Vec<LineItem>,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub balance_amount: Money,
    pub status: BillStatus,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    /// Optimistic concurrency token, incremented on every mutation
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    /// Creates a new bill with nothing paid
    ///
    /// # Errors
    ///
    /// Returns a validation error if `items` is empty, any item is malformed,
    /// or the due date precedes the bill date.
    pub fn new(
        bill_number: impl Into<String>,
        patient: PatientRef,
        items: Vec<NewLineItem>,
        bill_date: NaiveDate,
        due_date: NaiveDate,
    ) -> Result<Self, BillingError> {
        if items.is_empty() {
            return Err(BillingError::validation("a bill needs at least one line item"));
        }
        if due_date < bill_date {
            return Err(BillingError::validation(format!(
                "due date {} is before bill date {}",
                due_date, bill_date
            )));
        }
        if patient.patient_name.trim().is_empty() {
            return Err(BillingError::validation("patient name must not be empty"));
        }

        let now = Utc::now();
        let line_items = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| item.into_line_item(index, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bill = Self {
            id: BillId::new(),
            bill_number: bill_number.into(),
            patient_id: patient.patient_id,
            patient_name: patient.patient_name,
            visit_id: patient.visit_id,
            line_items,
            total_amount: Money::zero(),
            paid_amount: Money::zero(),
            balance_amount: Money::zero(),
            status: BillStatus::Pending,
            bill_date,
            due_date,
            notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        bill.recalculate_totals()?;
        bill.refresh_status(now.date_naive());
        Ok(bill)
    }

    /// Sets free-text notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Appends items at the end of the sequence
    ///
    /// Existing indexes, the paid amount and any settlement are untouched.
    ///
    /// # Returns
    ///
    /// The index range assigned to the new items
    pub fn append_items(&mut self, items: Vec<NewLineItem>) -> Result<Range<usize>, BillingError> {
        if items.is_empty() {
            return Err(BillingError::validation("no line items to append"));
        }

        let now = Utc::now();
        let start = self.line_items.len();
        let appended = items
            .into_iter()
            .enumerate()
            .map(|(offset, item)| item.into_line_item(start + offset, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = self.total_amount;
        for item in &appended {
            total = total.checked_add(&item.total_price)?;
        }

        self.line_items.extend(appended);
        self.total_amount = total;
        self.balance_amount = self.total_amount.checked_sub(&self.paid_amount)?;
        self.touch(now);

        Ok(start..self.line_items.len())
    }

    /// Records a payment against the bill
    ///
    /// # Errors
    ///
    /// Returns a validation error if the amount is not positive or exceeds
    /// the outstanding balance. The bill is unchanged on error.
    pub fn apply_payment(&mut self, amount: Money) -> Result<(), BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }
        if amount > self.balance_amount {
            return Err(BillingError::validation(format!(
                "payment amount {} exceeds outstanding balance {}",
                amount, self.balance_amount
            )));
        }

        let paid = self.paid_amount.checked_add(&amount)?;
        let balance = self.total_amount.checked_sub(&paid)?;
        self.paid_amount = paid;
        self.balance_amount = balance;
        self.touch(Utc::now());
        Ok(())
    }

    /// Takes a previously recorded payment back off the bill
    ///
    /// Used when a receipt is voided or refunded.
    pub fn reverse_payment(&mut self, amount: Money) -> Result<(), BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "reversal amount must be positive, got {}",
                amount
            )));
        }
        if amount > self.paid_amount {
            return Err(BillingError::validation(format!(
                "reversal amount {} exceeds paid amount {}",
                amount, self.paid_amount
            )));
        }

        let paid = self.paid_amount.checked_sub(&amount)?;
        let balance = self.total_amount.checked_sub(&paid)?;
        self.paid_amount = paid;
        self.balance_amount = balance;
        self.touch(Utc::now());
        Ok(())
    }

    /// Number of line items on the bill
    pub fn item_count(&self) -> usize {
        self.line_items.len()
    }

    /// Looks up a line item by index
    pub fn line_item(&self, index: usize) -> Option<&LineItem> {
        self.line_items.get(index)
    }

    /// Sum of all line item totals
    pub fn items_total(&self) -> Result<Money, BillingError> {
        Ok(Money::checked_sum(self.line_items.iter().map(|item| &item.total_price))?)
    }

    /// True once the due date has passed with a balance still owing
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.balance_amount.is_positive() && today > self.due_date
    }

    /// Status as of `today`
    pub fn status_on(&self, today: NaiveDate) -> BillStatus {
        BillStatus::derive(self.paid_amount, self.total_amount, self.due_date, today)
    }

    /// Re-derives the stored status as of `today`
    pub fn refresh_status(&mut self, today: NaiveDate) {
        self.status = self.status_on(today);
    }

    fn recalculate_totals(&mut self) -> Result<(), BillingError> {
        self.total_amount = self.items_total()?;
        self.balance_amount = self.total_amount.checked_sub(&self.paid_amount)?;
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
        self.refresh_status(now.date_naive());
    }
}

/// Formats a human-readable document number, e.g. `BILL-20240115-00042`
pub fn document_number(prefix: &str, date: NaiveDate, sequence: u64) -> String {
    format!("{}-{}-{:05}", prefix, date.format("%Y%m%d"), sequence)
}
