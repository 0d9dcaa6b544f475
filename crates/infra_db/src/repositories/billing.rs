//! Billing repository implementation
//!
//! This module provides database access for bills, their ordered line items
//! and payment receipts. Write methods take a `&mut PgConnection` so the
//! adapter can compose them inside one transaction; reads on the pool are
//! for snapshots.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

const BILL_COLUMNS: &str = r#"
    bill_id, bill_number, patient_id, patient_name, visit_id,
    total_amount, paid_amount, balance_amount, status,
    bill_date, due_date, notes, version, created_at, updated_at
"#;

const RECEIPT_COLUMNS: &str = r#"
    receipt_id, receipt_number, bill_id, amount, payment_method, payment_date,
    settled_indexes, status, cashier, notes, idempotency_key,
    status_reason, status_changed_at, created_at
"#;

/// Repository for bills and receipts
#[derive(Debug, Clone)]
pub struct BillingRepository {
    pool: PgPool,
}

impl BillingRepository {
    /// Creates a new BillingRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========================================================================
    // Bills
    // ========================================================================

    /// Next value of the bill number sequence
    pub async fn next_bill_sequence(&self, conn: &mut PgConnection) -> Result<i64, DatabaseError> {
        let value = sqlx::query_scalar::<_, i64>("SELECT nextval('bill_number_seq')")
            .fetch_one(conn)
            .await?;
        Ok(value)
    }

    /// Inserts a bill row with its line items
    pub async fn insert_bill(
        &self,
        conn: &mut PgConnection,
        bill: &NewBillRow,
        items: &[LineItemRow],
    ) -> Result<(), DatabaseError> {
        let query = format!(
            "INSERT INTO bills ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            BILL_COLUMNS
        );
        sqlx::query(&query)
            .bind(bill.bill_id)
            .bind(&bill.bill_number)
            .bind(bill.patient_id)
            .bind(&bill.patient_name)
            .bind(bill.visit_id)
            .bind(bill.total_amount)
            .bind(bill.paid_amount)
            .bind(bill.balance_amount)
            .bind(bill.status)
            .bind(bill.bill_date)
            .bind(bill.due_date)
            .bind(&bill.notes)
            .bind(bill.version)
            .bind(bill.created_at)
            .bind(bill.updated_at)
            .execute(&mut *conn)
            .await?;

        self.insert_line_items(conn, items).await
    }

    /// Inserts line items; their `item_index` must continue the bill's sequence
    pub async fn insert_line_items(
        &self,
        conn: &mut PgConnection,
        items: &[LineItemRow],
    ) -> Result<(), DatabaseError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO bill_line_items (
                    bill_id, item_index, name, quantity, unit_price,
                    total_price, service_id, added_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.bill_id)
            .bind(item.item_index)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .bind(item.service_id)
            .bind(item.added_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Retrieves a bill row by ID
    pub async fn get_bill(&self, bill_id: Uuid) -> Result<BillRow, DatabaseError> {
        let query = format!("SELECT {} FROM bills WHERE bill_id = $1", BILL_COLUMNS);
        sqlx::query_as::<_, BillRow>(&query)
            .bind(bill_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Bill", bill_id))
    }

    /// Retrieves a bill row by its human-readable number
    pub async fn find_bill_by_number(&self, bill_number: &str) -> Result<BillRow, DatabaseError> {
        let query = format!("SELECT {} FROM bills WHERE bill_number = $1", BILL_COLUMNS);
        sqlx::query_as::<_, BillRow>(&query)
            .bind(bill_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Bill", bill_number))
    }

    /// Bills of a patient, oldest first
    pub async fn list_bills_for_patient(&self, patient_id: Uuid) -> Result<Vec<BillRow>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM bills WHERE patient_id = $1 ORDER BY created_at, bill_number",
            BILL_COLUMNS
        );
        let rows = sqlx::query_as::<_, BillRow>(&query)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Locks a bill row for the rest of the transaction
    pub async fn lock_bill(&self, conn: &mut PgConnection, bill_id: Uuid) -> Result<BillRow, DatabaseError> {
        let query = format!("SELECT {} FROM bills WHERE bill_id = $1 FOR UPDATE", BILL_COLUMNS);
        sqlx::query_as::<_, BillRow>(&query)
            .bind(bill_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Bill", bill_id))
    }

    /// Line items of a bill in index order
    pub async fn line_items<'e, E>(&self, executor: E, bill_id: Uuid) -> Result<Vec<LineItemRow>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, LineItemRow>(
            r#"
            SELECT bill_id, item_index, name, quantity, unit_price,
                   total_price, service_id, added_at
            FROM bill_line_items
            WHERE bill_id = $1
            ORDER BY item_index
            "#,
        )
        .bind(bill_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Writes new amounts, status and version if the row is still at
    /// `expected_version`
    ///
    /// # Errors
    ///
    /// `DatabaseError::VersionConflict` if another writer got there first
    pub async fn update_bill_amounts(
        &self,
        conn: &mut PgConnection,
        update: &BillAmountsUpdate,
        expected_version: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bills
            SET total_amount = $1,
                paid_amount = $2,
                balance_amount = $3,
                status = $4,
                version = $5,
                updated_at = $6
            WHERE bill_id = $7 AND version = $8
            "#,
        )
        .bind(update.total_amount)
        .bind(update.paid_amount)
        .bind(update.balance_amount)
        .bind(update.status)
        .bind(update.version)
        .bind(update.updated_at)
        .bind(update.bill_id)
        .bind(expected_version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::VersionConflict(format!(
                "bill {} is no longer at version {}",
                update.bill_id, expected_version
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Receipts
    // ========================================================================

    /// Next value of the receipt number sequence
    pub async fn next_receipt_sequence(&self, conn: &mut PgConnection) -> Result<i64, DatabaseError> {
        let value = sqlx::query_scalar::<_, i64>("SELECT nextval('receipt_number_seq')")
            .fetch_one(conn)
            .await?;
        Ok(value)
    }

    /// Inserts a receipt row
    pub async fn insert_receipt(&self, conn: &mut PgConnection, receipt: &ReceiptRow) -> Result<(), DatabaseError> {
        let query = format!(
            "INSERT INTO receipts ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            RECEIPT_COLUMNS
        );
        sqlx::query(&query)
            .bind(receipt.receipt_id)
            .bind(&receipt.receipt_number)
            .bind(receipt.bill_id)
            .bind(receipt.amount)
            .bind(receipt.payment_method)
            .bind(receipt.payment_date)
            .bind(&receipt.settled_indexes)
            .bind(receipt.status)
            .bind(&receipt.cashier)
            .bind(&receipt.notes)
            .bind(&receipt.idempotency_key)
            .bind(&receipt.status_reason)
            .bind(receipt.status_changed_at)
            .bind(receipt.created_at)
            .execute(conn)
            .await
            .map_err(|e| match DatabaseError::from(e) {
                DatabaseError::DuplicateEntry(_) => DatabaseError::duplicate(
                    "Receipt",
                    "idempotency_key",
                    receipt.idempotency_key.as_deref().unwrap_or("-"),
                ),
                other => other,
            })?;
        Ok(())
    }

    /// Receipts of a bill in creation order
    pub async fn list_receipts(&self, bill_id: Uuid) -> Result<Vec<ReceiptRow>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM receipts WHERE bill_id = $1 ORDER BY created_at, receipt_number",
            RECEIPT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(bill_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Retrieves a receipt row by ID
    pub async fn get_receipt<'e, E>(&self, executor: E, receipt_id: Uuid) -> Result<ReceiptRow, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM receipts WHERE receipt_id = $1", RECEIPT_COLUMNS);
        sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(receipt_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Receipt", receipt_id))
    }

    /// Finds the receipt recorded under an idempotency key
    pub async fn find_receipt_by_idempotency_key<'e, E>(
        &self,
        executor: E,
        bill_id: Uuid,
        key: &str,
    ) -> Result<Option<ReceiptRow>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {} FROM receipts WHERE bill_id = $1 AND idempotency_key = $2",
            RECEIPT_COLUMNS
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(bill_id)
            .bind(key)
            .fetch_optional(executor)
            .await?;
        Ok(row)
    }

    /// First of `indexes` already claimed by an active receipt of the bill
    pub async fn find_claimed_index(
        &self,
        conn: &mut PgConnection,
        bill_id: Uuid,
        indexes: &[i32],
    ) -> Result<Option<i32>, DatabaseError> {
        if indexes.is_empty() {
            return Ok(None);
        }
        let claimed = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT claimed.idx
            FROM receipts, unnest(settled_indexes) AS claimed(idx)
            WHERE bill_id = $1
              AND status = 'active'
              AND claimed.idx = ANY($2)
            ORDER BY claimed.idx
            LIMIT 1
            "#,
        )
        .bind(bill_id)
        .bind(indexes)
        .fetch_optional(conn)
        .await?;
        Ok(claimed)
    }

    /// Records a receipt's status change
    pub async fn update_receipt_status(
        &self,
        conn: &mut PgConnection,
        receipt_id: Uuid,
        status: ReceiptStatus,
        reason: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE receipts
            SET status = $1, status_reason = $2, status_changed_at = $3
            WHERE receipt_id = $4 AND status = 'active'
            "#,
        )
        .bind(status)
        .bind(reason)
        .bind(changed_at)
        .bind(receipt_id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::VersionConflict(format!(
                "receipt {} is no longer active",
                receipt_id
            )));
        }
        Ok(())
    }

    /// Runs a trivial query to check connectivity
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Type definitions
// ============================================================================

/// Bill status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "bill_status", rename_all = "snake_case")]
pub enum BillStatus {
    Pending,
    Overdue,
    Partial,
    Paid,
}

/// Receipt status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "receipt_status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Active,
    Voided,
    Refunded,
}

/// Payment method enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Check,
    Lease,
    Insurance,
}

/// Database row for a bill
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillRow {
    pub bill_id: Uuid,
    pub bill_number: String,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub visit_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: BillStatus,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for inserting a bill; same shape as the row
pub type NewBillRow = BillRow;

/// Database row for a line item
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LineItemRow {
    pub bill_id: Uuid,
    pub item_index: i32,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub service_id: Option<Uuid>,
    pub added_at: DateTime<Utc>,
}

/// Aggregate columns rewritten by payments, reversals and appends
#[derive(Debug, Clone)]
pub struct BillAmountsUpdate {
    pub bill_id: Uuid,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: BillStatus,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Database row for a receipt
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptRow {
    pub receipt_id: Uuid,
    pub receipt_number: String,
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_date: DateTime<Utc>,
    pub settled_indexes: Vec<i32>,
    pub status: ReceiptStatus,
    pub cashier: String,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub status_reason: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
