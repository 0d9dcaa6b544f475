//! Billing Domain Ports
//!
//! This module defines the storage port the billing domain needs, so the
//! same payment logic runs on the in-memory adapter (single process, tests)
//! and on PostgreSQL (infra_db).
//!
//! # Architecture
//!
//! Reads return snapshots. Every write is a *commit* carrying the bill
//! version the caller validated against; an adapter applies the whole commit
//! or nothing, and rejects it with `PortError::Conflict` when the stored
//! bill has moved on:
//!
//! ```text
//! PaymentProcessor ──get_bill/list_receipts──▶ BillingPort
//!        │ validate selection + amount
//!        └──commit_payment(expected_version)──▶ bill update + receipt append
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_billing::{BillingPort, InMemoryBillingAdapter};
//! use std::sync::Arc;
//!
//! let port: Arc<dyn BillingPort> = Arc::new(InMemoryBillingAdapter::default());
//! let bill = port.get_bill(bill_id, None).await?;
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;

use core_kernel::{BillId, DomainPort, HealthCheckable, OperationMetadata, PatientId, PortError, ReceiptId};

use crate::bill::{Bill, NewLineItem, PatientRef};
use crate::receipt::{NewReceipt, Receipt, ReceiptStatus};

/// Everything needed to insert a bill
#[derive(Debug, Clone)]
pub struct NewBill {
    pub patient: PatientRef,
    pub items: Vec<NewLineItem>,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
}

/// A validated payment ready to be written
#[derive(Debug, Clone)]
pub struct PaymentCommit {
    /// Bill version the selection was validated against
    pub expected_version: u64,
    pub receipt: NewReceipt,
}

/// A receipt status change with its compensating bill update
#[derive(Debug, Clone)]
pub struct ReversalCommit {
    pub receipt_id: ReceiptId,
    pub expected_version: u64,
    /// `Voided` or `Refunded`
    pub target: ReceiptStatus,
    pub reason: String,
}

/// Storage port for bills and receipts
///
/// Adapters must make each commit atomic: after a successful
/// `commit_payment` the bill's paid amount and the new receipt are both
/// visible, after a failed one neither is.
#[async_trait]
pub trait BillingPort: DomainPort + HealthCheckable {
    // ========================================================================
    // Bills
    // ========================================================================

    /// Inserts a bill and assigns its number
    async fn create_bill(
        &self,
        bill: NewBill,
        metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError>;

    /// Retrieves a bill by ID, or `PortError::NotFound`
    async fn get_bill(
        &self,
        id: BillId,
        metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError>;

    /// Retrieves a bill by its human-readable number
    async fn find_bill_by_number(
        &self,
        bill_number: &str,
        metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError>;

    /// Bills of a patient, oldest first
    async fn list_bills_for_patient(
        &self,
        patient_id: PatientId,
        metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Bill>, PortError>;

    /// Appends line items if the bill is still at `expected_version`
    async fn append_line_items(
        &self,
        id: BillId,
        expected_version: u64,
        items: Vec<NewLineItem>,
        metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError>;

    // ========================================================================
    // Receipts
    // ========================================================================

    /// All receipts of a bill in creation order, any status
    async fn list_receipts(
        &self,
        bill_id: BillId,
        metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Receipt>, PortError>;

    /// Retrieves a receipt by ID
    async fn get_receipt(
        &self,
        id: ReceiptId,
        metadata: Option<OperationMetadata>,
    ) -> Result<Receipt, PortError>;

    /// Finds the receipt recorded under a client idempotency key
    async fn find_receipt_by_idempotency_key(
        &self,
        bill_id: BillId,
        key: &str,
        metadata: Option<OperationMetadata>,
    ) -> Result<Option<Receipt>, PortError>;

    // ========================================================================
    // Commits
    // ========================================================================

    /// Applies the payment to the bill and appends the receipt atomically
    ///
    /// # Errors
    ///
    /// - `Conflict` if the bill version moved, an index is already claimed by
    ///   an active receipt, or the idempotency key is taken
    /// - `Validation` if the amount is not payable
    async fn commit_payment(
        &self,
        commit: PaymentCommit,
        metadata: Option<OperationMetadata>,
    ) -> Result<(Receipt, Bill), PortError>;

    /// Moves an active receipt to voided/refunded and takes its amount off
    /// the bill's paid total atomically
    async fn commit_reversal(
        &self,
        commit: ReversalCommit,
        metadata: Option<OperationMetadata>,
    ) -> Result<(Receipt, Bill), PortError>;
}

/// Formats the conflict message for a stale version
pub fn stale_version_message(bill_id: &BillId, expected: u64, found: u64) -> String {
    format!(
        "bill {} changed since it was read (expected version {}, found {}); reload and retry",
        bill_id, expected, found
    )
}
