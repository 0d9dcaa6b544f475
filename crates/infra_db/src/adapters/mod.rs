//! Domain Adapters
//!
//! Adapter implementations for domain ports, connecting domain interfaces to
//! the PostgreSQL database layer. Each adapter implements the domain's port
//! trait, translates between domain models and row types, and uses the
//! repository layer for SQL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingAdapter;
//! use domain_billing::BillingPort;
//!
//! let adapter = PostgresBillingAdapter::new(pool);
//! let bill = adapter.get_bill(bill_id, None).await?;
//! ```

pub mod billing;

pub use billing::PostgresBillingAdapter;
