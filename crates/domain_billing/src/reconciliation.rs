//! Settlement reconciliation
//!
//! Which line items of a bill are paid is never stored. It is recomputed on
//! every read from the bill's active receipts: an item is settled when at
//! least one active receipt lists its index. The scan is
//! O(items × receipts), which is fine for clinic-sized bills.
//!
//! # Rules
//!
//! - Settlement is the union of active receipts' `settled_indexes`, so the
//!   receipt order never matters
//! - Amounts always come from `Receipt::amount`; an index claimed twice is
//!   reported as an anomaly but never counted twice
//! - A receipt with no indexes is a general payment: it counts toward
//!   `paid_amount` and settles nothing

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use core_kernel::{BillId, Money, ReceiptId};
use rust_decimal::Decimal;

use crate::bill::Bill;
use crate::error::{BillingError, SelectionError};
use crate::receipt::Receipt;

/// Data-integrity problem found while reconciling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementAnomaly {
    /// More than one active receipt claims the same line item
    DuplicateSettlement { index: usize, receipts: Vec<ReceiptId> },
    /// An active receipt claims an index the bill does not have
    UnknownIndex { index: usize, receipt: ReceiptId },
}

/// Settled/outstanding partition of a bill's line items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub settled: BTreeSet<usize>,
    pub outstanding: BTreeSet<usize>,
    pub anomalies: Vec<SettlementAnomaly>,
}

impl Settlement {
    pub fn is_settled(&self, index: usize) -> bool {
        self.settled.contains(&index)
    }

    /// True when every line item is covered
    pub fn is_fully_settled(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Computes which line items are settled
///
/// Receipts that are not active are skipped, so callers may pass the full
/// history of the bill.
pub fn compute_settled(bill: &Bill, receipts: &[Receipt]) -> Settlement {
    let item_count = bill.item_count();
    let mut claims: BTreeMap<usize, Vec<ReceiptId>> = BTreeMap::new();
    let mut unknown: Vec<(usize, ReceiptId)> = Vec::new();

    for receipt in receipts.iter().filter(|r| r.is_active()) {
        for &index in &receipt.settled_indexes {
            if index < item_count {
                claims.entry(index).or_default().push(receipt.id);
            } else {
                unknown.push((index, receipt.id));
            }
        }
    }

    let mut anomalies = Vec::new();
    for (index, receipts) in &claims {
        if receipts.len() > 1 {
            let mut receipts = receipts.clone();
            receipts.sort();
            anomalies.push(SettlementAnomaly::DuplicateSettlement { index: *index, receipts });
        }
    }
    unknown.sort();
    anomalies.extend(
        unknown
            .into_iter()
            .map(|(index, receipt)| SettlementAnomaly::UnknownIndex { index, receipt }),
    );

    if !anomalies.is_empty() {
        warn!(
            bill_id = %bill.id,
            bill_number = %bill.bill_number,
            anomalies = anomalies.len(),
            "Settlement anomalies found during reconciliation"
        );
    }

    let settled: BTreeSet<usize> = claims.into_keys().collect();
    let outstanding = (0..item_count).filter(|i| !settled.contains(i)).collect();

    Settlement {
        settled,
        outstanding,
        anomalies,
    }
}

/// A validated payment selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub indexes: BTreeSet<usize>,
    /// Σ `total_price` of the selected items
    pub computed_amount: Money,
    /// The caller asked for nothing, so every outstanding item was taken
    pub auto_selected: bool,
}

/// Validates the requested indexes against the current settlement
///
/// An empty request selects every outstanding item. Repeated indexes in the
/// request collapse to one.
///
/// # Errors
///
/// - [`SelectionError::AlreadySettled`] if any requested item is settled
/// - [`SelectionError::OutOfRange`] if any index is past the last item
pub fn validate_selection(
    bill: &Bill,
    settled: &BTreeSet<usize>,
    requested: &[usize],
) -> Result<Selection, BillingError> {
    let item_count = bill.item_count();

    let (indexes, auto_selected): (BTreeSet<usize>, bool) = if requested.is_empty() {
        ((0..item_count).filter(|i| !settled.contains(i)).collect(), true)
    } else {
        (requested.iter().copied().collect(), false)
    };

    if let Some(&index) = indexes.iter().find(|i| settled.contains(i)) {
        return Err(SelectionError::AlreadySettled { index }.into());
    }
    if let Some(&index) = indexes.iter().find(|&&i| i >= item_count) {
        return Err(SelectionError::OutOfRange { index, item_count }.into());
    }

    let computed_amount = Money::checked_sum(
        indexes
            .iter()
            .filter_map(|&i| bill.line_item(i))
            .map(|item| &item.total_price),
    )?;

    Ok(Selection {
        indexes,
        computed_amount,
        auto_selected,
    })
}

/// Read-only row of the settlement projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItemView {
    pub index: usize,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub total_price: Money,
    pub settled: bool,
    /// Earliest active receipt covering the item
    pub settled_by: Option<ReceiptId>,
}

/// Projects the bill's line items with their settlement flag
pub fn line_items_with_settlement(bill: &Bill, receipts: &[Receipt]) -> Vec<LineItemView> {
    let settlement = compute_settled(bill, receipts);

    let mut active: Vec<&Receipt> = receipts.iter().filter(|r| r.is_active()).collect();
    active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    bill.line_items
        .iter()
        .map(|item| LineItemView {
            index: item.index,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            settled: settlement.is_settled(item.index),
            settled_by: active
                .iter()
                .find(|r| r.settles(item.index))
                .map(|r| r.id),
        })
        .collect()
}

/// A broken bill invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Σ line item totals differs from `total_amount`
    TotalMismatch { items_total: Money, total_amount: Money },
    /// Σ active receipt amounts differs from `paid_amount`
    PaidMismatch { receipts_total: Money, paid_amount: Money },
    /// `balance_amount` is not `total_amount - paid_amount`
    BalanceMismatch { expected: Money, balance_amount: Money },
    NegativeBalance { balance_amount: Money },
}

/// Result of checking a stored bill against its receipt history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationAudit {
    pub bill_id: BillId,
    pub bill_number: String,
    pub items_total: Money,
    pub receipts_total: Money,
    pub active_receipts: usize,
    pub general_payments: usize,
    pub settlement: Settlement,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationAudit {
    /// No discrepancies and no settlement anomalies
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && self.settlement.anomalies.is_empty()
    }
}

/// Checks a bill's aggregates against its line items and active receipts
pub fn audit(bill: &Bill, receipts: &[Receipt]) -> Result<ReconciliationAudit, BillingError> {
    let active: Vec<&Receipt> = receipts.iter().filter(|r| r.is_active()).collect();

    let items_total = bill.items_total()?;
    let receipts_total = Money::checked_sum(active.iter().map(|r| &r.amount))?;
    let expected_balance = bill.total_amount.checked_sub(&bill.paid_amount)?;

    let mut discrepancies = Vec::new();
    if items_total != bill.total_amount {
        discrepancies.push(Discrepancy::TotalMismatch {
            items_total,
            total_amount: bill.total_amount,
        });
    }
    if receipts_total != bill.paid_amount {
        discrepancies.push(Discrepancy::PaidMismatch {
            receipts_total,
            paid_amount: bill.paid_amount,
        });
    }
    if expected_balance != bill.balance_amount {
        discrepancies.push(Discrepancy::BalanceMismatch {
            expected: expected_balance,
            balance_amount: bill.balance_amount,
        });
    }
    if bill.balance_amount.is_negative() {
        discrepancies.push(Discrepancy::NegativeBalance {
            balance_amount: bill.balance_amount,
        });
    }

    if !discrepancies.is_empty() {
        warn!(
            bill_id = %bill.id,
            discrepancies = discrepancies.len(),
            "Bill failed reconciliation audit"
        );
    }

    Ok(ReconciliationAudit {
        bill_id: bill.id,
        bill_number: bill.bill_number.clone(),
        items_total,
        receipts_total,
        active_receipts: active.len(),
        general_payments: active.iter().filter(|r| r.is_general_payment()).count(),
        settlement: compute_settled(bill, receipts),
        discrepancies,
    })
}
