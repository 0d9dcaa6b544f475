//! PostgreSQL Billing Adapter
//!
//! Implements `BillingPort` on top of [`BillingRepository`]. Every commit
//! runs in one transaction that starts by locking the bill row
//! (`SELECT ... FOR UPDATE`), so concurrent payments against the same bill
//! are serialized by the database even across API processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingAdapter;
//! use domain_billing::{BillingConfig, BillingService};
//! use std::sync::Arc;
//!
//! let adapter = PostgresBillingAdapter::new(pool).with_config(&config);
//! let service = BillingService::new(Arc::new(adapter), config);
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    BillId, DomainPort, HealthCheckResult, HealthCheckable, Money, OperationMetadata, PatientId,
    PortError, ReceiptId, ServiceId, VisitId,
};
use domain_billing::bill::document_number;
use domain_billing::ports::stale_version_message;
use domain_billing::{
    Bill, BillStatus, BillingConfig, BillingPort, LineItem, NewBill, NewLineItem, PaymentCommit,
    PaymentMethod, Receipt, ReceiptStatus, ReversalCommit,
};

use crate::error::DatabaseError;
use crate::repositories::billing::{
    BillAmountsUpdate, BillRow, BillingRepository, LineItemRow, ReceiptRow,
    BillStatus as DbBillStatus, PaymentMethod as DbPaymentMethod, ReceiptStatus as DbReceiptStatus,
};

const ADAPTER_ID: &str = "postgres-billing-adapter";

/// PostgreSQL-backed implementation of the BillingPort trait
///
/// # Error Handling
///
/// - a stale `expected_version`, an index already claimed by an active
///   receipt or a taken idempotency key -> `PortError::Conflict`
/// - amounts the bill cannot take -> `PortError::Validation`
/// - missing rows -> `PortError::NotFound` with entity `Bill` or `Receipt`
#[derive(Debug, Clone)]
pub struct PostgresBillingAdapter {
    repository: BillingRepository,
    bill_number_prefix: String,
    receipt_number_prefix: String,
}

impl PostgresBillingAdapter {
    /// Creates an adapter with the default number prefixes
    pub fn new(pool: PgPool) -> Self {
        let defaults = BillingConfig::default();
        Self {
            repository: BillingRepository::new(pool),
            bill_number_prefix: defaults.bill_number_prefix,
            receipt_number_prefix: defaults.receipt_number_prefix,
        }
    }

    /// Uses the configured bill/receipt number prefixes
    pub fn with_config(mut self, config: &BillingConfig) -> Self {
        self.bill_number_prefix = config.bill_number_prefix.clone();
        self.receipt_number_prefix = config.receipt_number_prefix.clone();
        self
    }

    /// Returns a reference to the underlying repository
    pub fn repository(&self) -> &BillingRepository {
        &self.repository
    }

    async fn load_bill(&self, row: BillRow) -> Result<Bill, PortError> {
        let items = self.repository.line_items(self.repository.pool(), row.bill_id).await?;
        Ok(bill_from_rows(row, items)?)
    }
}

impl DomainPort for PostgresBillingAdapter {}

#[async_trait]
impl HealthCheckable for PostgresBillingAdapter {
    /// Performs a `SELECT 1` against the pool
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = self.repository.ping().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(ADAPTER_ID, latency_ms, format!("Database error: {}", e)),
        }
    }
}

#[async_trait]
impl BillingPort for PostgresBillingAdapter {
    #[instrument(skip(self, bill, _metadata), fields(patient_id = %bill.patient.patient_id))]
    async fn create_bill(
        &self,
        bill: NewBill,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let mut tx = self.repository.pool().begin().await.map_err(DatabaseError::from)?;

        let sequence = self.repository.next_bill_sequence(&mut tx).await?;
        let number = document_number(&self.bill_number_prefix, bill.bill_date, to_sequence(sequence)?);

        let mut created = Bill::new(number, bill.patient, bill.items, bill.bill_date, bill.due_date)?;
        created.notes = bill.notes;

        let items = line_item_rows(created.id, &created.line_items)?;
        self.repository
            .insert_bill(&mut tx, &bill_row(&created)?, &items)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        debug!(bill_number = %created.bill_number, "Bill stored");
        Ok(created)
    }

    #[instrument(skip(self, _metadata), fields(bill_id = %id))]
    async fn get_bill(
        &self,
        id: BillId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let row = self.repository.get_bill(id.into()).await?;
        self.load_bill(row).await
    }

    async fn find_bill_by_number(
        &self,
        bill_number: &str,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let row = self.repository.find_bill_by_number(bill_number).await?;
        self.load_bill(row).await
    }

    async fn list_bills_for_patient(
        &self,
        patient_id: PatientId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Bill>, PortError> {
        let rows = self.repository.list_bills_for_patient(patient_id.into()).await?;

        let mut bills = Vec::with_capacity(rows.len());
        for row in rows {
            bills.push(self.load_bill(row).await?);
        }
        Ok(bills)
    }

    #[instrument(skip(self, items, _metadata), fields(bill_id = %id, items = items.len()))]
    async fn append_line_items(
        &self,
        id: BillId,
        expected_version: u64,
        items: Vec<NewLineItem>,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let mut tx = self.repository.pool().begin().await.map_err(DatabaseError::from)?;

        let row = self.repository.lock_bill(&mut tx, id.into()).await?;
        let stored_version = check_version(&id, &row, expected_version)?;

        let existing = self.repository.line_items(&mut *tx, row.bill_id).await?;
        let mut bill = bill_from_rows(row, existing)?;
        let appended = bill.append_items(items)?;

        let new_items = line_item_rows(bill.id, &bill.line_items[appended])?;
        self.repository.insert_line_items(&mut tx, &new_items).await?;
        self.repository
            .update_bill_amounts(&mut tx, &amounts_update(&bill)?, stored_version)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        debug!(items = bill.item_count(), version = bill.version, "Line items stored");
        Ok(bill)
    }

    async fn list_receipts(
        &self,
        bill_id: BillId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Receipt>, PortError> {
        let rows = self.repository.list_receipts(bill_id.into()).await?;
        Ok(rows
            .into_iter()
            .map(receipt_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_receipt(
        &self,
        id: ReceiptId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Receipt, PortError> {
        let row = self.repository.get_receipt(self.repository.pool(), id.into()).await?;
        Ok(receipt_from_row(row)?)
    }

    async fn find_receipt_by_idempotency_key(
        &self,
        bill_id: BillId,
        key: &str,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Option<Receipt>, PortError> {
        let row = self
            .repository
            .find_receipt_by_idempotency_key(self.repository.pool(), bill_id.into(), key)
            .await?;
        Ok(row.map(receipt_from_row).transpose()?)
    }

    #[instrument(skip(self, commit, metadata), fields(bill_id = %commit.receipt.bill_id, amount = %commit.receipt.amount))]
    async fn commit_payment(
        &self,
        commit: PaymentCommit,
        metadata: Option<OperationMetadata>,
    ) -> Result<(Receipt, Bill), PortError> {
        let bill_id = commit.receipt.bill_id;
        let mut tx = self.repository.pool().begin().await.map_err(DatabaseError::from)?;

        let row = self.repository.lock_bill(&mut tx, bill_id.into()).await?;
        let stored_version = check_version(&bill_id, &row, commit.expected_version)?;

        let indexes = index_column(&commit.receipt.settled_indexes)?;
        if let Some(index) = self
            .repository
            .find_claimed_index(&mut tx, row.bill_id, &indexes)
            .await?
        {
            return Err(PortError::conflict(format!(
                "line item {} of bill {} was settled concurrently",
                index, bill_id
            )));
        }
        if let Some(key) = commit.receipt.idempotency_key.as_deref() {
            let existing = self
                .repository
                .find_receipt_by_idempotency_key(&mut *tx, row.bill_id, key)
                .await?;
            if existing.is_some() {
                return Err(PortError::conflict(format!(
                    "idempotency key '{}' is already used on bill {}",
                    key, bill_id
                )));
            }
        }

        let items = self.repository.line_items(&mut *tx, row.bill_id).await?;
        let mut bill = bill_from_rows(row, items)?;
        bill.apply_payment(commit.receipt.amount)?;

        let sequence = self.repository.next_receipt_sequence(&mut tx).await?;
        let number = document_number(
            &self.receipt_number_prefix,
            Utc::now().date_naive(),
            to_sequence(sequence)?,
        );
        let receipt = Receipt::issue(number, commit.receipt);

        self.repository
            .update_bill_amounts(&mut tx, &amounts_update(&bill)?, stored_version)
            .await?;
        self.repository.insert_receipt(&mut tx, &receipt_row(&receipt)?).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        let actor = metadata.as_ref().and_then(|m| m.initiated_by.as_deref()).unwrap_or("-");
        debug!(receipt_number = %receipt.receipt_number, version = bill.version, actor, "Payment committed");
        Ok((receipt, bill))
    }

    #[instrument(skip(self, commit, _metadata), fields(receipt_id = %commit.receipt_id, target = %commit.target))]
    async fn commit_reversal(
        &self,
        commit: ReversalCommit,
        _metadata: Option<OperationMetadata>,
    ) -> Result<(Receipt, Bill), PortError> {
        if commit.target == ReceiptStatus::Active {
            return Err(PortError::validation("a reversal cannot target the active status"));
        }
        let mut tx = self.repository.pool().begin().await.map_err(DatabaseError::from)?;

        let receipt_id: Uuid = commit.receipt_id.into();
        let bill_uuid = self.repository.get_receipt(&mut *tx, receipt_id).await?.bill_id;
        let row = self.repository.lock_bill(&mut tx, bill_uuid).await?;
        let bill_id = BillId::from_uuid(bill_uuid);
        let stored_version = check_version(&bill_id, &row, commit.expected_version)?;

        // Re-read under the bill lock; receipt transitions always take it first
        let mut receipt = receipt_from_row(self.repository.get_receipt(&mut *tx, receipt_id).await?)?;
        if !receipt.is_active() {
            return Err(PortError::validation(format!(
                "receipt {} is already {}",
                receipt.receipt_number, receipt.status
            )));
        }

        let items = self.repository.line_items(&mut *tx, bill_uuid).await?;
        let mut bill = bill_from_rows(row, items)?;
        bill.reverse_payment(receipt.amount)?;
        receipt.reverse(commit.target, commit.reason.as_str())?;

        let changed_at = receipt.status_changed_at.unwrap_or_else(Utc::now);
        self.repository
            .update_bill_amounts(&mut tx, &amounts_update(&bill)?, stored_version)
            .await?;
        self.repository
            .update_receipt_status(&mut tx, receipt_id, receipt_status_to_db(receipt.status), &commit.reason, changed_at)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        debug!(receipt_number = %receipt.receipt_number, version = bill.version, "Reversal committed");
        Ok((receipt, bill))
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn check_version(bill_id: &BillId, row: &BillRow, expected: u64) -> Result<i64, PortError> {
    let found = version_from_db(row.version)?;
    if found != expected {
        return Err(PortError::conflict(stale_version_message(bill_id, expected, found)));
    }
    Ok(row.version)
}

fn to_sequence(value: i64) -> Result<u64, DatabaseError> {
    u64::try_from(value).map_err(|_| DatabaseError::corrupt("sequence", value))
}

fn version_from_db(version: i64) -> Result<u64, DatabaseError> {
    u64::try_from(version).map_err(|_| DatabaseError::corrupt("bills.version", version))
}

fn version_to_db(version: u64) -> Result<i64, DatabaseError> {
    i64::try_from(version).map_err(|_| DatabaseError::corrupt("bills.version", version))
}

fn index_to_db(index: usize) -> Result<i32, DatabaseError> {
    i32::try_from(index).map_err(|_| DatabaseError::corrupt("item_index", index))
}

fn index_from_db(index: i32) -> Result<usize, DatabaseError> {
    usize::try_from(index).map_err(|_| DatabaseError::corrupt("item_index", index))
}

fn index_column(indexes: &BTreeSet<usize>) -> Result<Vec<i32>, DatabaseError> {
    indexes.iter().map(|i| index_to_db(*i)).collect()
}

fn bill_status_to_db(status: BillStatus) -> DbBillStatus {
    match status {
        BillStatus::Pending => DbBillStatus::Pending,
        BillStatus::Overdue => DbBillStatus::Overdue,
        BillStatus::Partial => DbBillStatus::Partial,
        BillStatus::Paid => DbBillStatus::Paid,
    }
}

fn bill_status_from_db(status: DbBillStatus) -> BillStatus {
    match status {
        DbBillStatus::Pending => BillStatus::Pending,
        DbBillStatus::Overdue => BillStatus::Overdue,
        DbBillStatus::Partial => BillStatus::Partial,
        DbBillStatus::Paid => BillStatus::Paid,
    }
}

fn receipt_status_to_db(status: ReceiptStatus) -> DbReceiptStatus {
    match status {
        ReceiptStatus::Active => DbReceiptStatus::Active,
        ReceiptStatus::Voided => DbReceiptStatus::Voided,
        ReceiptStatus::Refunded => DbReceiptStatus::Refunded,
    }
}

fn receipt_status_from_db(status: DbReceiptStatus) -> ReceiptStatus {
    match status {
        DbReceiptStatus::Active => ReceiptStatus::Active,
        DbReceiptStatus::Voided => ReceiptStatus::Voided,
        DbReceiptStatus::Refunded => ReceiptStatus::Refunded,
    }
}

fn payment_method_to_db(method: PaymentMethod) -> DbPaymentMethod {
    match method {
        PaymentMethod::Cash => DbPaymentMethod::Cash,
        PaymentMethod::Card => DbPaymentMethod::Card,
        PaymentMethod::Check => DbPaymentMethod::Check,
        PaymentMethod::Lease => DbPaymentMethod::Lease,
        PaymentMethod::Insurance => DbPaymentMethod::Insurance,
    }
}

fn payment_method_from_db(method: DbPaymentMethod) -> PaymentMethod {
    match method {
        DbPaymentMethod::Cash => PaymentMethod::Cash,
        DbPaymentMethod::Card => PaymentMethod::Card,
        DbPaymentMethod::Check => PaymentMethod::Check,
        DbPaymentMethod::Lease => PaymentMethod::Lease,
        DbPaymentMethod::Insurance => PaymentMethod::Insurance,
    }
}

fn bill_row(bill: &Bill) -> Result<BillRow, DatabaseError> {
    Ok(BillRow {
        bill_id: bill.id.into(),
        bill_number: bill.bill_number.clone(),
        patient_id: bill.patient_id.into(),
        patient_name: bill.patient_name.clone(),
        visit_id: bill.visit_id.map(Uuid::from),
        total_amount: bill.total_amount.amount(),
        paid_amount: bill.paid_amount.amount(),
        balance_amount: bill.balance_amount.amount(),
        status: bill_status_to_db(bill.status),
        bill_date: bill.bill_date,
        due_date: bill.due_date,
        notes: bill.notes.clone(),
        version: version_to_db(bill.version)?,
        created_at: bill.created_at,
        updated_at: bill.updated_at,
    })
}

fn amounts_update(bill: &Bill) -> Result<BillAmountsUpdate, DatabaseError> {
    Ok(BillAmountsUpdate {
        bill_id: bill.id.into(),
        total_amount: bill.total_amount.amount(),
        paid_amount: bill.paid_amount.amount(),
        balance_amount: bill.balance_amount.amount(),
        status: bill_status_to_db(bill.status),
        version: version_to_db(bill.version)?,
        updated_at: bill.updated_at,
    })
}

fn line_item_rows(bill_id: BillId, items: &[LineItem]) -> Result<Vec<LineItemRow>, DatabaseError> {
    items
        .iter()
        .map(|item| {
            Ok(LineItemRow {
                bill_id: bill_id.into(),
                item_index: index_to_db(item.index)?,
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price.amount(),
                total_price: item.total_price.amount(),
                service_id: item.service_id.map(Uuid::from),
                added_at: item.added_at,
            })
        })
        .collect()
}

fn bill_from_rows(row: BillRow, items: Vec<LineItemRow>) -> Result<Bill, DatabaseError> {
    let mut line_items = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        let index = index_from_db(item.item_index)?;
        if index != position {
            return Err(DatabaseError::corrupt("bill_line_items.item_index", item.item_index));
        }
        line_items.push(LineItem {
            index,
            name: item.name,
            quantity: item.quantity,
            unit_price: Money::new(item.unit_price),
            total_price: Money::new(item.total_price),
            service_id: item.service_id.map(ServiceId::from_uuid),
            added_at: item.added_at,
        });
    }

    Ok(Bill {
        id: BillId::from_uuid(row.bill_id),
        bill_number: row.bill_number,
        patient_id: PatientId::from_uuid(row.patient_id),
        patient_name: row.patient_name,
        visit_id: row.visit_id.map(VisitId::from_uuid),
        line_items,
        total_amount: Money::new(row.total_amount),
        paid_amount: Money::new(row.paid_amount),
        balance_amount: Money::new(row.balance_amount),
        status: bill_status_from_db(row.status),
        bill_date: row.bill_date,
        due_date: row.due_date,
        notes: row.notes,
        version: version_from_db(row.version)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn receipt_row(receipt: &Receipt) -> Result<ReceiptRow, DatabaseError> {
    Ok(ReceiptRow {
        receipt_id: receipt.id.into(),
        receipt_number: receipt.receipt_number.clone(),
        bill_id: receipt.bill_id.into(),
        amount: receipt.amount.amount(),
        payment_method: payment_method_to_db(receipt.payment_method),
        payment_date: receipt.payment_date,
        settled_indexes: index_column(&receipt.settled_indexes)?,
        status: receipt_status_to_db(receipt.status),
        cashier: receipt.cashier.clone(),
        notes: receipt.notes.clone(),
        idempotency_key: receipt.idempotency_key.clone(),
        status_reason: receipt.status_reason.clone(),
        status_changed_at: receipt.status_changed_at,
        created_at: receipt.created_at,
    })
}

fn receipt_from_row(row: ReceiptRow) -> Result<Receipt, DatabaseError> {
    let settled_indexes = row
        .settled_indexes
        .iter()
        .map(|i| index_from_db(*i))
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(Receipt {
        id: ReceiptId::from_uuid(row.receipt_id),
        receipt_number: row.receipt_number,
        bill_id: BillId::from_uuid(row.bill_id),
        amount: Money::new(row.amount),
        payment_method: payment_method_from_db(row.payment_method),
        payment_date: row.payment_date,
        settled_indexes,
        status: receipt_status_from_db(row.status),
        cashier: row.cashier,
        notes: row.notes,
        idempotency_key: row.idempotency_key,
        status_reason: row.status_reason,
        status_changed_at: row.status_changed_at,
        created_at: row.created_at,
    })
}
