//! Billing handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use core_kernel::{BillId, Money, PatientId, ReceiptId, VisitId};
use domain_billing::{normalize_items, PatientRef, PaymentMethod, PaymentRequest};

use crate::dto::billing::*;
use crate::{error::ApiError, AppState};

/// Creates a bill
pub async fn create_bill(
    State(state): State<AppState>,
    Json(request): Json<CreateBillRequest>,
) -> Result<(StatusCode, Json<BillResponse>), ApiError> {
    request.validate()?;

    let mut patient = PatientRef::new(PatientId::from_uuid(request.patient_id), request.patient_name);
    if let Some(visit_id) = request.visit_id {
        patient = patient.with_visit(VisitId::from_uuid(visit_id));
    }
    let items = normalize_items(request.items)?;

    let bill = state
        .service
        .create_bill(patient, items, request.due_date, request.notes)
        .await?;

    Ok((StatusCode::CREATED, Json(BillResponse::from(&bill))))
}

/// Gets a bill by ID
pub async fn get_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<BillResponse>, ApiError> {
    let bill = state.service.get_bill(BillId::from_uuid(bill_id)).await?;
    Ok(Json(BillResponse::from(&bill)))
}

/// Gets a bill by its number
pub async fn get_bill_by_number(
    State(state): State<AppState>,
    Path(bill_number): Path<String>,
) -> Result<Json<BillResponse>, ApiError> {
    let bill = state.service.find_bill_by_number(&bill_number).await?;
    Ok(Json(BillResponse::from(&bill)))
}

/// Lists a patient's bills
pub async fn list_patient_bills(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<BillResponse>>, ApiError> {
    let bills = state
        .service
        .list_bills_for_patient(PatientId::from_uuid(patient_id))
        .await?;
    Ok(Json(bills.iter().map(BillResponse::from).collect()))
}

/// Appends line items to a bill
pub async fn append_items(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
    Json(request): Json<AppendItemsRequest>,
) -> Result<Json<BillResponse>, ApiError> {
    request.validate()?;

    let items = normalize_items(request.items)?;
    let bill = state
        .service
        .append_line_items(BillId::from_uuid(bill_id), items)
        .await?;
    Ok(Json(BillResponse::from(&bill)))
}

/// Lists line items with their settled flag
pub async fn list_items(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<Vec<LineItemSettlementResponse>>, ApiError> {
    let items = state
        .service
        .list_line_items_with_settlement(BillId::from_uuid(bill_id))
        .await?;
    Ok(Json(items.into_iter().map(LineItemSettlementResponse::from).collect()))
}

/// Lists a bill's receipts
pub async fn list_receipts(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
    Query(query): Query<ListReceiptsQuery>,
) -> Result<Json<Vec<ReceiptResponse>>, ApiError> {
    let receipts = state
        .service
        .list_receipts(BillId::from_uuid(bill_id), query.active_only)
        .await?;
    Ok(Json(receipts.iter().map(ReceiptResponse::from).collect()))
}

/// Records a payment
///
/// Returns 201 for a new receipt and 200 when an idempotency key replays an
/// earlier one.
pub async fn record_payment(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    request.validate()?;

    let method: PaymentMethod = request.payment_method.parse()?;
    let mut payment = PaymentRequest::new(BillId::from_uuid(bill_id), method, request.cashier)
        .with_indexes(request.selected_indexes);
    if let Some(amount) = request.override_amount {
        payment = payment.with_override(Money::new(amount));
    }
    if let Some(notes) = request.notes {
        payment = payment.with_notes(notes);
    }
    if let Some(key) = request.idempotency_key {
        payment = payment.with_idempotency_key(key);
    }

    let outcome = state.service.record_payment(payment).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(PaymentResponse::from(&outcome))))
}

/// Runs the reconciliation audit for a bill
pub async fn audit_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<domain_billing::ReconciliationAudit>, ApiError> {
    let audit = state.service.audit_bill(BillId::from_uuid(bill_id)).await?;
    Ok(Json(audit))
}

/// Gets a receipt by ID
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<Uuid>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let receipt = state.service.get_receipt(ReceiptId::from_uuid(receipt_id)).await?;
    Ok(Json(ReceiptResponse::from(&receipt)))
}

/// Voids a receipt
pub async fn void_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<Uuid>,
    Json(request): Json<ReverseReceiptRequest>,
) -> Result<Json<ReversalResponse>, ApiError> {
    request.validate()?;
    let outcome = state
        .service
        .void_receipt(ReceiptId::from_uuid(receipt_id), request.reason)
        .await?;
    Ok(Json(ReversalResponse::from(&outcome)))
}

/// Refunds a receipt
pub async fn refund_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<Uuid>,
    Json(request): Json<ReverseReceiptRequest>,
) -> Result<Json<ReversalResponse>, ApiError> {
    request.validate()?;
    let outcome = state
        .service
        .refund_receipt(ReceiptId::from_uuid(receipt_id), request.reason)
        .await?;
    Ok(Json(ReversalResponse::from(&outcome)))
}
