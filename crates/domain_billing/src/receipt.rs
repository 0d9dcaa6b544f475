//! Payment receipts
//!
//! A receipt records one payment transaction against a bill and the line
//! item positions it settles. Receipts are immutable apart from the single
//! status transition out of `Active`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use core_kernel::{BillId, Money, ReceiptId};
use crate::error::BillingError;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    /// Paid through a lease/credit arrangement
    Lease,
    Insurance,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Check => "check",
            PaymentMethod::Lease => "lease",
            PaymentMethod::Insurance => "insurance",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "check" | "cheque" => Ok(PaymentMethod::Check),
            "lease" => Ok(PaymentMethod::Lease),
            "insurance" => Ok(PaymentMethod::Insurance),
            other => Err(BillingError::validation(format!("unknown payment method '{}'", other))),
        }
    }
}

/// Receipt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// Counts toward the bill's paid amount and settlement
    Active,
    Voided,
    Refunded,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Active => "active",
            ReceiptStatus::Voided => "voided",
            ReceiptStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReceiptStatus::Active),
            "voided" => Ok(ReceiptStatus::Voided),
            "refunded" => Ok(ReceiptStatus::Refunded),
            other => Err(BillingError::validation(format!("unknown receipt status '{}'", other))),
        }
    }
}

/// Data for a receipt that has not been issued yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReceipt {
    pub bill_id: BillId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    /// Empty for a general payment that settles no specific item
    pub settled_indexes: BTreeSet<usize>,
    pub cashier: String,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

/// A payment receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique identifier
    pub id: ReceiptId,
    /// Receipt number (human-readable)
    pub receipt_number: String,
    pub bill_id: BillId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_date: DateTime<Utc>,
    pub settled_indexes: BTreeSet<usize>,
    pub status: ReceiptStatus,
    pub cashier: String,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    /// Why the receipt was voided or refunded
    pub status_reason: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Issues an active receipt
    pub fn issue(receipt_number: impl Into<String>, new: NewReceipt) -> Self {
        let now = Utc::now();

        Self {
            id: ReceiptId::new(),
            receipt_number: receipt_number.into(),
            bill_id: new.bill_id,
            amount: new.amount,
            payment_method: new.payment_method,
            payment_date: now,
            settled_indexes: new.settled_indexes,
            status: ReceiptStatus::Active,
            cashier: new.cashier,
            notes: new.notes,
            idempotency_key: new.idempotency_key,
            status_reason: None,
            status_changed_at: None,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReceiptStatus::Active
    }

    /// A payment recorded without item-level settlement
    pub fn is_general_payment(&self) -> bool {
        self.settled_indexes.is_empty()
    }

    /// True if this receipt covers the given line item
    pub fn settles(&self, index: usize) -> bool {
        self.settled_indexes.contains(&index)
    }

    /// Marks the receipt voided
    pub fn void(&mut self, reason: impl Into<String>) -> Result<(), BillingError> {
        self.transition(ReceiptStatus::Voided, reason.into())
    }

    /// Marks the receipt refunded
    pub fn refund(&mut self, reason: impl Into<String>) -> Result<(), BillingError> {
        self.transition(ReceiptStatus::Refunded, reason.into())
    }

    /// Applies a reversal status; only `Active` receipts can be reversed
    pub fn reverse(&mut self, target: ReceiptStatus, reason: impl Into<String>) -> Result<(), BillingError> {
        self.transition(target, reason.into())
    }

    fn transition(&mut self, target: ReceiptStatus, reason: String) -> Result<(), BillingError> {
        if target == ReceiptStatus::Active {
            return Err(BillingError::validation(format!(
                "receipt {} cannot be reactivated",
                self.receipt_number
            )));
        }
        if !self.is_active() {
            return Err(BillingError::validation(format!(
                "receipt {} is already {}",
                self.receipt_number, self.status
            )));
        }

        self.status = target;
        self.status_reason = Some(reason);
        self.status_changed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn receipt(indexes: &[usize]) -> Receipt {
        Receipt::issue(
            "RCT-20240101-00001",
            NewReceipt {
                bill_id: BillId::new(),
                amount: Money::new(dec!(125)),
                payment_method: PaymentMethod::Cash,
                settled_indexes: indexes.iter().copied().collect(),
                cashier: "front-desk".to_string(),
                notes: None,
                idempotency_key: None,
            },
        )
    }

    #[test]
    fn test_issue_is_active() {
        let receipt = receipt(&[0, 2]);
        assert!(receipt.is_active());
        assert!(receipt.settles(2));
        assert!(!receipt.settles(1));
        assert!(!receipt.is_general_payment());
        assert!(receipt.status_changed_at.is_none());
    }

    #[test]
    fn test_void_once() {
        let mut receipt = receipt(&[0]);
        receipt.void("keyed wrong amount").unwrap();

        assert_eq!(receipt.status, ReceiptStatus::Voided);
        assert_eq!(receipt.status_reason.as_deref(), Some("keyed wrong amount"));
        assert!(receipt.refund("again").is_err());
        assert_eq!(receipt.status, ReceiptStatus::Voided);
    }

    #[test]
    fn test_cannot_reactivate() {
        let mut receipt = receipt(&[]);
        assert!(receipt.is_general_payment());
        assert!(receipt.reverse(ReceiptStatus::Active, "undo").is_err());
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("Cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!("cheque".parse::<PaymentMethod>().unwrap(), PaymentMethod::Check);
        assert_eq!(" INSURANCE ".parse::<PaymentMethod>().unwrap(), PaymentMethod::Insurance);
        assert!("bitcoin".parse::<PaymentMethod>().is_err());

        let json = serde_json::to_string(&PaymentMethod::Lease).unwrap();
        assert_eq!(json, "\"lease\"");
    }
}
