//! Payment processing
//!
//! [`PaymentProcessor`] is the only writer of payments. A payment runs as
//! one critical section per bill:
//!
//! 1. Load the bill and its receipts
//! 2. Reconcile settlement and validate the selection
//! 3. Resolve the amount (override or computed)
//! 4. Commit bill update and receipt append together
//!
//! Two processes sharing a database are kept apart by the version check in
//! step 4; within one process the [`BillLocks`] registry makes concurrent
//! requests for the same bill queue instead of racing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use core_kernel::{BillId, Money, OperationMetadata, ReceiptId};

use crate::bill::Bill;
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::ports::{BillingPort, PaymentCommit, ReversalCommit};
use crate::receipt::{NewReceipt, PaymentMethod, Receipt, ReceiptStatus};
use crate::reconciliation::{compute_settled, validate_selection, Selection};

/// Per-bill async mutexes
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct BillLocks {
    locks: Mutex<HashMap<BillId, Arc<tokio::sync::Mutex<()>>>>,
}

impl BillLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `bill_id`
    pub async fn acquire(&self, bill_id: BillId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(bill_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of bills with a live lock entry
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cashier's request to pay some or all of a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub bill_id: BillId,
    /// Line item indexes to settle; empty means every outstanding item
    #[serde(default)]
    pub selected_indexes: Vec<usize>,
    pub method: PaymentMethod,
    pub cashier: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Cashier-entered amount replacing the computed one
    #[serde(default)]
    pub override_amount: Option<Money>,
    /// Client token making a retried request safe
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl PaymentRequest {
    /// Request settling every outstanding item at the computed amount
    pub fn new(bill_id: BillId, method: PaymentMethod, cashier: impl Into<String>) -> Self {
        Self {
            bill_id,
            selected_indexes: Vec::new(),
            method,
            cashier: cashier.into(),
            notes: None,
            override_amount: None,
            idempotency_key: None,
        }
    }

    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = usize>) -> Self {
        self.selected_indexes = indexes.into_iter().collect();
        self
    }

    pub fn with_override(mut self, amount: Money) -> Self {
        self.override_amount = Some(amount);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOutcome {
    pub receipt: Receipt,
    pub bill: Bill,
    /// True when an earlier receipt was returned for a repeated idempotency key
    pub replayed: bool,
}

/// Result of voiding or refunding a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversalOutcome {
    pub receipt: Receipt,
    pub bill: Bill,
}

/// Records payments and reversals against bills
#[derive(Clone)]
pub struct PaymentProcessor {
    port: Arc<dyn BillingPort>,
    locks: Arc<BillLocks>,
    config: BillingConfig,
}

impl std::fmt::Debug for PaymentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentProcessor")
            .field("locks", &self.locks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PaymentProcessor {
    pub fn new(port: Arc<dyn BillingPort>, locks: Arc<BillLocks>, config: BillingConfig) -> Self {
        Self { port, locks, config }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Records a payment against a bill
    ///
    /// # Errors
    ///
    /// - `Selection` if a requested item is settled or out of range
    /// - `Validation` for a bad amount, a blank cashier, or a reused
    ///   idempotency key with different parameters
    /// - `BillNotFound` for an unknown bill
    /// - `Concurrency` if the bill changed between load and commit
    ///
    /// Nothing is written on any error.
    #[instrument(
        skip(self, request),
        fields(bill_id = %request.bill_id, method = %request.method, cashier = %request.cashier)
    )]
    pub async fn record_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome, BillingError> {
        if request.cashier.trim().is_empty() {
            return Err(BillingError::validation("cashier must not be empty"));
        }

        let _guard = self.locks.acquire(request.bill_id).await;
        let metadata = Some(OperationMetadata::default().initiated_by(request.cashier.clone()));

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self
                .port
                .find_receipt_by_idempotency_key(request.bill_id, key, metadata.clone())
                .await?
            {
                return self.replay(&request, existing).await;
            }
        }

        let bill = self.port.get_bill(request.bill_id, metadata.clone()).await?;
        let receipts = self.port.list_receipts(request.bill_id, metadata.clone()).await?;
        let settlement = compute_settled(&bill, &receipts);

        let selection = validate_selection(&bill, &settlement.settled, &request.selected_indexes)
            .inspect_err(|e| warn!(error = %e, "Payment selection rejected"))?;
        let amount = self.resolve_amount(&bill, &selection, request.override_amount)?;

        let commit = PaymentCommit {
            expected_version: bill.version,
            receipt: NewReceipt {
                bill_id: bill.id,
                amount,
                payment_method: request.method,
                settled_indexes: selection.indexes,
                cashier: request.cashier,
                notes: request.notes,
                idempotency_key: request.idempotency_key,
            },
        };

        let (receipt, bill) = self
            .port
            .commit_payment(commit, metadata)
            .await
            .map_err(BillingError::from)
            .inspect_err(|e| {
                if let BillingError::Concurrency(message) = e {
                    warn!(%message, "Payment commit conflicted");
                }
            })?;

        info!(
            receipt_number = %receipt.receipt_number,
            bill_number = %bill.bill_number,
            amount = %receipt.amount,
            items = receipt.settled_indexes.len(),
            balance = %bill.balance_amount,
            "Payment recorded"
        );

        Ok(PaymentOutcome {
            receipt,
            bill,
            replayed: false,
        })
    }

    /// Voids a receipt and takes its amount off the bill
    pub async fn void_receipt(
        &self,
        receipt_id: ReceiptId,
        reason: impl Into<String>,
    ) -> Result<ReversalOutcome, BillingError> {
        self.reverse(receipt_id, ReceiptStatus::Voided, reason.into()).await
    }

    /// Refunds a receipt and takes its amount off the bill
    pub async fn refund_receipt(
        &self,
        receipt_id: ReceiptId,
        reason: impl Into<String>,
    ) -> Result<ReversalOutcome, BillingError> {
        self.reverse(receipt_id, ReceiptStatus::Refunded, reason.into()).await
    }

    #[instrument(skip(self, reason), fields(receipt_id = %receipt_id, target = %target))]
    async fn reverse(
        &self,
        receipt_id: ReceiptId,
        target: ReceiptStatus,
        reason: String,
    ) -> Result<ReversalOutcome, BillingError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(BillingError::validation(format!(
                "a reason is required to mark a receipt {}",
                target
            )));
        }

        let bill_id = self.port.get_receipt(receipt_id, None).await?.bill_id;
        let _guard = self.locks.acquire(bill_id).await;

        // Re-read under the lock; another reversal may have won
        let receipt = self.port.get_receipt(receipt_id, None).await?;
        if !receipt.is_active() {
            return Err(BillingError::validation(format!(
                "receipt {} is already {}",
                receipt.receipt_number, receipt.status
            )));
        }
        let bill = self.port.get_bill(bill_id, None).await?;

        let commit = ReversalCommit {
            receipt_id,
            expected_version: bill.version,
            target,
            reason,
        };
        let (receipt, bill) = self.port.commit_reversal(commit, None).await?;

        info!(
            receipt_number = %receipt.receipt_number,
            bill_number = %bill.bill_number,
            amount = %receipt.amount,
            status = %receipt.status,
            "Receipt reversed"
        );

        Ok(ReversalOutcome { receipt, bill })
    }

    /// Picks the amount to charge and checks it is payable
    fn resolve_amount(
        &self,
        bill: &Bill,
        selection: &Selection,
        override_amount: Option<Money>,
    ) -> Result<Money, BillingError> {
        let amount = match override_amount {
            Some(amount) => {
                if self.config.strict_amount_mode && amount != selection.computed_amount {
                    return Err(BillingError::validation(format!(
                        "amount {} does not match the selected items' total {}",
                        amount, selection.computed_amount
                    )));
                }
                amount
            }
            None if selection.indexes.is_empty() => {
                return Err(BillingError::validation(
                    "no outstanding line items to settle; enter an amount for a general payment",
                ));
            }
            None => selection.computed_amount,
        };

        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }
        if amount > bill.balance_amount {
            return Err(BillingError::validation(format!(
                "payment amount {} exceeds outstanding balance {}",
                amount, bill.balance_amount
            )));
        }
        Ok(amount)
    }

    /// Answers a repeated request with the receipt it already produced
    ///
    /// A receipt reversed since then is not reported as a payment; the caller
    /// must reload and pay under a new key.
    async fn replay(&self, request: &PaymentRequest, existing: Receipt) -> Result<PaymentOutcome, BillingError> {
        if !existing.is_active() {
            return Err(BillingError::validation(format!(
                "idempotency key belongs to receipt {} which is {}",
                existing.receipt_number, existing.status
            )));
        }
        if let Some(amount) = request.override_amount {
            if amount != existing.amount {
                return Err(BillingError::validation(format!(
                    "idempotency key already used for a payment of {}",
                    existing.amount
                )));
            }
        }
        if !request.selected_indexes.is_empty() {
            let requested: BTreeSet<usize> = request.selected_indexes.iter().copied().collect();
            if requested != existing.settled_indexes {
                return Err(BillingError::validation(
                    "idempotency key already used for a different line item selection",
                ));
            }
        }

        let mut bill = self.port.get_bill(existing.bill_id, None).await?;
        bill.refresh_status(Utc::now().date_naive());

        info!(receipt_number = %existing.receipt_number, "Replayed payment for repeated idempotency key");

        Ok(PaymentOutcome {
            receipt: existing,
            bill,
            replayed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locks_are_exclusive_per_bill() {
        let locks = Arc::new(BillLocks::new());
        let bill_id = BillId::new();

        let guard = locks.acquire(bill_id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(bill_id).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // Other bills are not blocked
        let _other = locks.acquire(BillId::new()).await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_unused_locks_are_pruned() {
        let locks = BillLocks::new();
        for _ in 0..5 {
            let _guard = locks.acquire(BillId::new()).await;
        }
        let _held = locks.acquire(BillId::new()).await;
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_payment_request_builder() {
        let bill_id = BillId::new();
        let request = PaymentRequest::new(bill_id, PaymentMethod::Cash, "desk")
            .with_indexes([2, 0])
            .with_idempotency_key("k-1");

        assert_eq!(request.selected_indexes, vec![2, 0]);
        assert_eq!(request.idempotency_key.as_deref(), Some("k-1"));
        assert!(request.override_amount.is_none());
    }
}
