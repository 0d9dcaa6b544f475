//! Billing Domain - Itemized Bill Payment Reconciliation
//!
//! This crate keeps track of which line items of a patient bill have been
//! paid. Payments are recorded as receipts naming the item positions they
//! settle; whether an item is settled is always re-derived from the active
//! receipts rather than stored on the item.
//!
//! # Components
//!
//! - **BillStore**: canonical bills with append-only line items
//! - **ReceiptLedger**: append-only receipt history per bill
//! - **Reconciliation**: settled/outstanding computation, selection
//!   validation, the line item projection and consistency audits
//! - **PaymentProcessor**: the only writer of payments and reversals,
//!   serialized per bill
//! - **BillingService**: facade used by the HTTP layer
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingConfig, BillingService, PaymentRequest, PaymentMethod};
//!
//! let service = BillingService::in_memory(BillingConfig::default());
//! let bill = service.create_bill(patient, items, None, None).await?;
//!
//! // Pay the consultation and the lab test
//! let outcome = service
//!     .record_payment(
//!         PaymentRequest::new(bill.id, PaymentMethod::Cash, "front-desk").with_indexes([0, 2]),
//!     )
//!     .await?;
//! ```

pub mod bill;
pub mod config;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod memory;
pub mod ports;
pub mod processor;
pub mod receipt;
pub mod reconciliation;
pub mod service;
pub mod store;

pub use bill::{Bill, BillStatus, LineItem, NewLineItem, PatientRef};
pub use config::BillingConfig;
pub use error::{BillingError, ErrorKind, SelectionError};
pub use intake::{normalize_items, CatalogService, LineItemInput, SourceCharge};
pub use ledger::ReceiptLedger;
pub use memory::InMemoryBillingAdapter;
pub use ports::{BillingPort, NewBill, PaymentCommit, ReversalCommit};
pub use processor::{BillLocks, PaymentOutcome, PaymentProcessor, PaymentRequest, ReversalOutcome};
pub use receipt::{NewReceipt, PaymentMethod, Receipt, ReceiptStatus};
pub use reconciliation::{
    audit, compute_settled, line_items_with_settlement, validate_selection, Discrepancy,
    LineItemView, ReconciliationAudit, Selection, Settlement, SettlementAnomaly,
};
pub use service::BillingService;
pub use store::BillStore;
