//! Billing DTOs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_kernel::Money;
use domain_billing::{
    Bill, LineItem, LineItemInput, LineItemView, PaymentOutcome, Receipt, ReversalOutcome,
};

fn amount(money: &Money) -> Decimal {
    money.round_to_currency().amount()
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBillRequest {
    pub patient_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub patient_name: String,
    pub visit_id: Option<Uuid>,
    #[validate(length(min = 1, message = "a bill needs at least one line item"))]
    pub items: Vec<LineItemInput>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppendItemsRequest {
    #[validate(length(min = 1, message = "no line items to append"))]
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    /// Empty settles every outstanding item
    #[serde(default)]
    pub selected_indexes: Vec<usize>,
    pub payment_method: String,
    #[validate(length(min = 1, max = 100))]
    pub cashier: String,
    pub notes: Option<String>,
    pub override_amount: Option<Decimal>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReverseReceiptRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListReceiptsQuery {
    #[serde(default)]
    pub active_only: bool,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub index: usize,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub service_id: Option<Uuid>,
}

impl From<&LineItem> for LineItemResponse {
    fn from(item: &LineItem) -> Self {
        Self {
            index: item.index,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: amount(&item.unit_price),
            total_price: amount(&item.total_price),
            service_id: item.service_id.map(Uuid::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BillResponse {
    pub id: Uuid,
    pub bill_number: String,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub visit_id: Option<Uuid>,
    pub line_items: Vec<LineItemResponse>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: String,
    pub overdue: bool,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Bill> for BillResponse {
    fn from(bill: &Bill) -> Self {
        Self {
            id: bill.id.into(),
            bill_number: bill.bill_number.clone(),
            patient_id: bill.patient_id.into(),
            patient_name: bill.patient_name.clone(),
            visit_id: bill.visit_id.map(Uuid::from),
            line_items: bill.line_items.iter().map(LineItemResponse::from).collect(),
            total_amount: amount(&bill.total_amount),
            paid_amount: amount(&bill.paid_amount),
            balance_amount: amount(&bill.balance_amount),
            status: bill.status.as_str().to_string(),
            overdue: bill.is_overdue(Utc::now().date_naive()),
            bill_date: bill.bill_date,
            due_date: bill.due_date,
            notes: bill.notes.clone(),
            version: bill.version,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
        }
    }
}

/// One row of the line items with settlement projection
#[derive(Debug, Serialize)]
pub struct LineItemSettlementResponse {
    pub index: usize,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub settled: bool,
    pub settled_by: Option<Uuid>,
}

impl From<LineItemView> for LineItemSettlementResponse {
    fn from(view: LineItemView) -> Self {
        Self {
            index: view.index,
            name: view.name,
            quantity: view.quantity,
            unit_price: amount(&view.unit_price),
            total_price: amount(&view.total_price),
            settled: view.settled,
            settled_by: view.settled_by.map(Uuid::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub id: Uuid,
    pub receipt_number: String,
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_date: DateTime<Utc>,
    pub settled_indexes: Vec<usize>,
    pub status: String,
    pub cashier: String,
    pub notes: Option<String>,
    pub status_reason: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl From<&Receipt> for ReceiptResponse {
    fn from(receipt: &Receipt) -> Self {
        Self {
            id: receipt.id.into(),
            receipt_number: receipt.receipt_number.clone(),
            bill_id: receipt.bill_id.into(),
            amount: amount(&receipt.amount),
            payment_method: receipt.payment_method.as_str().to_string(),
            payment_date: receipt.payment_date,
            settled_indexes: receipt.settled_indexes.iter().copied().collect(),
            status: receipt.status.as_str().to_string(),
            cashier: receipt.cashier.clone(),
            notes: receipt.notes.clone(),
            status_reason: receipt.status_reason.clone(),
            status_changed_at: receipt.status_changed_at,
        }
    }
}

/// Receipt plus the updated bill, for receipt rendering
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub receipt: ReceiptResponse,
    pub bill: BillResponse,
    pub replayed: bool,
}

impl From<&PaymentOutcome> for PaymentResponse {
    fn from(outcome: &PaymentOutcome) -> Self {
        Self {
            receipt: ReceiptResponse::from(&outcome.receipt),
            bill: BillResponse::from(&outcome.bill),
            replayed: outcome.replayed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReversalResponse {
    pub receipt: ReceiptResponse,
    pub bill: BillResponse,
}

impl From<&ReversalOutcome> for ReversalResponse {
    fn from(outcome: &ReversalOutcome) -> Self {
        Self {
            receipt: ReceiptResponse::from(&outcome.receipt),
            bill: BillResponse::from(&outcome.bill),
        }
    }
}
