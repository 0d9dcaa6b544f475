//! In-memory billing adapter
//!
//! [`BillStore`] and [`ReceiptLedger`] behind a single `RwLock`. Commits
//! take the write lock for their whole check-then-write sequence, which makes
//! each commit atomic within the process. Used by tests and by the API when
//! running without a database.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use core_kernel::{
    BillId, DomainPort, HealthCheckResult, HealthCheckable, OperationMetadata, PatientId,
    PortError, ReceiptId,
};

use crate::bill::{Bill, NewLineItem};
use crate::config::BillingConfig;
use crate::ledger::ReceiptLedger;
use crate::ports::{stale_version_message, BillingPort, NewBill, PaymentCommit, ReversalCommit};
use crate::receipt::{Receipt, ReceiptStatus};
use crate::store::BillStore;

#[derive(Debug)]
struct State {
    bills: BillStore,
    receipts: ReceiptLedger,
}

impl State {
    fn check_version(&self, bill_id: &BillId, expected: u64) -> Result<(), PortError> {
        let found = self.bills.version_of(bill_id)?;
        if found != expected {
            return Err(PortError::conflict(stale_version_message(bill_id, expected, found)));
        }
        Ok(())
    }

    /// Indexes already claimed by an active receipt of the bill
    fn claimed_indexes(&self, bill_id: &BillId) -> BTreeSet<usize> {
        self.receipts
            .list_active(bill_id)
            .into_iter()
            .flat_map(|r| r.settled_indexes)
            .collect()
    }
}

/// [`BillingPort`] implementation holding everything in process memory
#[derive(Debug, Clone)]
pub struct InMemoryBillingAdapter {
    state: Arc<RwLock<State>>,
}

impl Default for InMemoryBillingAdapter {
    fn default() -> Self {
        Self::new(&BillingConfig::default())
    }
}

impl InMemoryBillingAdapter {
    /// Creates an empty adapter using the configured number prefixes
    pub fn new(config: &BillingConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                bills: BillStore::new(config.bill_number_prefix.clone()),
                receipts: ReceiptLedger::new(config.receipt_number_prefix.clone()),
            })),
        }
    }

    /// Number of stored bills
    pub async fn bill_count(&self) -> usize {
        self.state.read().await.bills.len()
    }

    /// Number of stored receipts, any status
    pub async fn receipt_count(&self) -> usize {
        self.state.read().await.receipts.len()
    }
}

impl DomainPort for InMemoryBillingAdapter {}

#[async_trait]
impl HealthCheckable for InMemoryBillingAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("in-memory-billing-adapter", 0)
    }
}

#[async_trait]
impl BillingPort for InMemoryBillingAdapter {
    #[instrument(skip(self, bill, _metadata), fields(patient_id = %bill.patient.patient_id))]
    async fn create_bill(
        &self,
        bill: NewBill,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let mut state = self.state.write().await;
        let created = state.bills.create_dated(
            bill.patient,
            bill.items,
            bill.bill_date,
            bill.due_date,
            bill.notes,
        )?;

        debug!(bill_number = %created.bill_number, "Bill stored");
        Ok(created)
    }

    async fn get_bill(
        &self,
        id: BillId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        Ok(self.state.read().await.bills.get(&id)?)
    }

    async fn find_bill_by_number(
        &self,
        bill_number: &str,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        Ok(self.state.read().await.bills.find_by_number(bill_number)?)
    }

    async fn list_bills_for_patient(
        &self,
        patient_id: PatientId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Bill>, PortError> {
        Ok(self.state.read().await.bills.list_for_patient(&patient_id))
    }

    #[instrument(skip(self, items, _metadata), fields(items = items.len()))]
    async fn append_line_items(
        &self,
        id: BillId,
        expected_version: u64,
        items: Vec<NewLineItem>,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Bill, PortError> {
        let mut state = self.state.write().await;
        state.check_version(&id, expected_version)?;
        Ok(state.bills.append_line_items(&id, items)?)
    }

    async fn list_receipts(
        &self,
        bill_id: BillId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Vec<Receipt>, PortError> {
        Ok(self.state.read().await.receipts.list(&bill_id))
    }

    async fn get_receipt(
        &self,
        id: ReceiptId,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Receipt, PortError> {
        Ok(self.state.read().await.receipts.get(&id)?)
    }

    async fn find_receipt_by_idempotency_key(
        &self,
        bill_id: BillId,
        key: &str,
        _metadata: Option<OperationMetadata>,
    ) -> Result<Option<Receipt>, PortError> {
        Ok(self.state.read().await.receipts.find_by_idempotency_key(&bill_id, key))
    }

    #[instrument(skip(self, commit, metadata), fields(bill_id = %commit.receipt.bill_id, amount = %commit.receipt.amount))]
    async fn commit_payment(
        &self,
        commit: PaymentCommit,
        metadata: Option<OperationMetadata>,
    ) -> Result<(Receipt, Bill), PortError> {
        let mut state = self.state.write().await;
        let bill_id = commit.receipt.bill_id;

        state.check_version(&bill_id, commit.expected_version)?;

        let claimed = state.claimed_indexes(&bill_id);
        if let Some(index) = commit.receipt.settled_indexes.intersection(&claimed).next() {
            return Err(PortError::conflict(format!(
                "line item {} of bill {} was settled concurrently",
                index, bill_id
            )));
        }
        state.receipts.check_append(&commit.receipt)?;

        // Nothing below can fail for a reason the checks above missed
        let bill = state.bills.apply_payment(&bill_id, commit.receipt.amount)?;
        let receipt = state.receipts.append(commit.receipt)?;

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
        let mut state = self.state.write().await;

        let receipt = state.receipts.get(&commit.receipt_id)?;
        state.check_version(&receipt.bill_id, commit.expected_version)?;
        if !receipt.is_active() {
            return Err(PortError::validation(format!(
                "receipt {} is already {}",
                receipt.receipt_number, receipt.status
            )));
        }

        let bill = state.bills.reverse_payment(&receipt.bill_id, receipt.amount)?;
        let receipt = state
            .receipts
            .transition(&commit.receipt_id, commit.target, &commit.reason)?;

        debug!(receipt_number = %receipt.receipt_number, version = bill.version, "Reversal committed");
        Ok((receipt, bill))
    }
}
