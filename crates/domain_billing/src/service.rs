//! Billing service facade
//!
//! Entry point for everything outside the domain: bill creation, appends,
//! the read-only settlement projection and the payment processor. All
//! operations share one port and one [`BillLocks`] registry, so an append
//! and a payment on the same bill never interleave.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use core_kernel::{BillId, HealthCheckResult, PatientId, ReceiptId};

use crate::bill::{Bill, NewLineItem, PatientRef};
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::memory::InMemoryBillingAdapter;
use crate::ports::{BillingPort, NewBill};
use crate::processor::{BillLocks, PaymentOutcome, PaymentProcessor, PaymentRequest, ReversalOutcome};
use crate::receipt::Receipt;
use crate::reconciliation::{self, LineItemView, ReconciliationAudit, Settlement};

/// Application service over a [`BillingPort`]
#[derive(Clone)]
pub struct BillingService {
    port: Arc<dyn BillingPort>,
    locks: Arc<BillLocks>,
    processor: PaymentProcessor,
    config: BillingConfig,
}

impl std::fmt::Debug for BillingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BillingService {
    /// Creates a service over the given storage port
    pub fn new(port: Arc<dyn BillingPort>, config: BillingConfig) -> Self {
        let locks = Arc::new(BillLocks::new());
        let processor = PaymentProcessor::new(Arc::clone(&port), Arc::clone(&locks), config.clone());
        Self {
            port,
            locks,
            processor,
            config,
        }
    }

    /// Creates a service backed by process memory
    pub fn in_memory(config: BillingConfig) -> Self {
        let adapter = InMemoryBillingAdapter::new(&config);
        Self::new(Arc::new(adapter), config)
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// The payment processor sharing this service's port and locks
    pub fn processor(&self) -> &PaymentProcessor {
        &self.processor
    }

    /// Creates a bill dated today
    ///
    /// `due_date` defaults to today plus `default_due_days`.
    #[instrument(skip(self, patient, items), fields(patient_id = %patient.patient_id, items = items.len()))]
    pub async fn create_bill(
        &self,
        patient: PatientRef,
        items: Vec<NewLineItem>,
        due_date: Option<NaiveDate>,
        notes: Option<String>,
    ) -> Result<Bill, BillingError> {
        let bill_date = Utc::now().date_naive();
        let due_date = due_date.unwrap_or_else(|| self.config.default_due_date(bill_date));

        let bill = self
            .port
            .create_bill(
                NewBill {
                    patient,
                    items,
                    bill_date,
                    due_date,
                    notes,
                },
                None,
            )
            .await?;

        info!(
            bill_id = %bill.id,
            bill_number = %bill.bill_number,
            total = %bill.total_amount,
            "Bill created"
        );
        Ok(bill)
    }

    /// Appends items to a bill
    ///
    /// Existing indexes and settlement are unaffected; the new items are
    /// outstanding.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn append_line_items(
        &self,
        bill_id: BillId,
        items: Vec<NewLineItem>,
    ) -> Result<Bill, BillingError> {
        let _guard = self.locks.acquire(bill_id).await;

        let current = self.port.get_bill(bill_id, None).await?;
        let bill = self
            .port
            .append_line_items(bill_id, current.version, items, None)
            .await?;

        info!(
            bill_number = %bill.bill_number,
            items = bill.item_count(),
            total = %bill.total_amount,
            "Line items appended"
        );
        Ok(bill)
    }

    /// Snapshot of a bill with its status as of today
    pub async fn get_bill(&self, bill_id: BillId) -> Result<Bill, BillingError> {
        let bill = self.port.get_bill(bill_id, None).await?;
        Ok(fresh(bill))
    }

    pub async fn find_bill_by_number(&self, bill_number: &str) -> Result<Bill, BillingError> {
        let bill = self.port.find_bill_by_number(bill_number, None).await?;
        Ok(fresh(bill))
    }

    pub async fn list_bills_for_patient(&self, patient_id: PatientId) -> Result<Vec<Bill>, BillingError> {
        let bills = self.port.list_bills_for_patient(patient_id, None).await?;
        Ok(bills.into_iter().map(fresh).collect())
    }

    /// Settled/outstanding partition of the bill's items
    pub async fn settlement(&self, bill_id: BillId) -> Result<Settlement, BillingError> {
        let (bill, receipts) = self.load(bill_id).await?;
        Ok(reconciliation::compute_settled(&bill, &receipts))
    }

    /// Line items with their settlement flags
    pub async fn list_line_items_with_settlement(
        &self,
        bill_id: BillId,
    ) -> Result<Vec<LineItemView>, BillingError> {
        let (bill, receipts) = self.load(bill_id).await?;
        Ok(reconciliation::line_items_with_settlement(&bill, &receipts))
    }

    /// Receipts of a bill in creation order
    pub async fn list_receipts(&self, bill_id: BillId, active_only: bool) -> Result<Vec<Receipt>, BillingError> {
        // Surfaces NotFound for an unknown bill instead of an empty list
        self.port.get_bill(bill_id, None).await?;

        let receipts = self.port.list_receipts(bill_id, None).await?;
        Ok(if active_only {
            receipts.into_iter().filter(Receipt::is_active).collect()
        } else {
            receipts
        })
    }

    pub async fn get_receipt(&self, receipt_id: ReceiptId) -> Result<Receipt, BillingError> {
        Ok(self.port.get_receipt(receipt_id, None).await?)
    }

    /// Checks the stored bill against its receipt history
    pub async fn audit_bill(&self, bill_id: BillId) -> Result<ReconciliationAudit, BillingError> {
        let (bill, receipts) = self.load(bill_id).await?;
        reconciliation::audit(&bill, &receipts)
    }

    pub async fn record_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome, BillingError> {
        self.processor.record_payment(request).await
    }

    pub async fn void_receipt(
        &self,
        receipt_id: ReceiptId,
        reason: impl Into<String>,
    ) -> Result<ReversalOutcome, BillingError> {
        self.processor.void_receipt(receipt_id, reason).await
    }

    pub async fn refund_receipt(
        &self,
        receipt_id: ReceiptId,
        reason: impl Into<String>,
    ) -> Result<ReversalOutcome, BillingError> {
        self.processor.refund_receipt(receipt_id, reason).await
    }

    /// Health of the storage adapter
    pub async fn health(&self) -> HealthCheckResult {
        self.port.health_check().await
    }

    async fn load(&self, bill_id: BillId) -> Result<(Bill, Vec<Receipt>), BillingError> {
        let bill = self.port.get_bill(bill_id, None).await?;
        let receipts = self.port.list_receipts(bill_id, None).await?;
        Ok((fresh(bill), receipts))
    }
}

fn fresh(mut bill: Bill) -> Bill {
    bill.refresh_status(Utc::now().date_naive());
    bill
}
