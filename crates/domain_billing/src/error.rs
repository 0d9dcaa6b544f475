//! Billing domain errors
//!
//! Every failure leaving the billing boundary is a [`BillingError`]. Callers
//! that need a stable machine-readable category use [`BillingError::kind`];
//! the `Display` text is the human message shown to the cashier.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_kernel::{MoneyError, PortError};

/// Why a requested set of line items cannot be paid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The line item is already covered by an active receipt
    #[error("line item {index} is already settled")]
    AlreadySettled { index: usize },

    /// The index does not address a line item on the bill
    #[error("line item {index} is out of range (bill has {item_count} items)")]
    OutOfRange { index: usize, item_count: usize },
}

impl SelectionError {
    /// Returns the offending line item index
    pub fn index(&self) -> usize {
        match self {
            SelectionError::AlreadySettled { index } | SelectionError::OutOfRange { index, .. } => *index,
        }
    }
}

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad amount, empty bill, malformed line item, illegal status transition
    #[error("Validation error: {0}")]
    Validation(String),

    /// The payment selection conflicts with the bill's settlement state
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Bill not found
    #[error("Bill not found: {0}")]
    BillNotFound(String),

    /// Receipt not found
    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    /// Bill state changed between load and commit
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Arithmetic failure while totalling amounts
    #[error("Calculation error: {0}")]
    Calculation(#[from] MoneyError),

    /// Storage adapter failure
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Stable error category exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Selection,
    NotFound,
    Concurrency,
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Selection => "selection",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Internal => "internal",
        }
    }
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn concurrency(message: impl Into<String>) -> Self {
        BillingError::Concurrency(message.into())
    }

    /// Returns the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_) => ErrorKind::Validation,
            BillingError::Selection(_) => ErrorKind::Selection,
            BillingError::BillNotFound(_) | BillingError::ReceiptNotFound(_) => ErrorKind::NotFound,
            BillingError::Concurrency(_) => ErrorKind::Concurrency,
            BillingError::Calculation(_) | BillingError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// True when the caller should reload settlement state and re-select
    pub fn requires_reload(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrency | ErrorKind::Selection)
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } if entity_type == "Receipt" => {
                BillingError::ReceiptNotFound(id)
            }
            PortError::NotFound { id, .. } => BillingError::BillNotFound(id),
            PortError::Validation { message, .. } => BillingError::Validation(message),
            PortError::Conflict { message } => BillingError::Concurrency(message),
            other => BillingError::Storage(other.to_string()),
        }
    }
}

impl From<BillingError> for PortError {
    fn from(error: BillingError) -> Self {
        match error {
            BillingError::Validation(message) => PortError::validation(message),
            BillingError::BillNotFound(id) => PortError::not_found("Bill", id),
            BillingError::ReceiptNotFound(id) => PortError::not_found("Receipt", id),
            BillingError::Selection(e) => PortError::conflict(e.to_string()),
            BillingError::Concurrency(message) => PortError::conflict(message),
            other => PortError::internal(other.to_string()),
        }
    }
}
