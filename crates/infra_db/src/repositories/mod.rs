//! Repository implementations for domain entities
//!
//! Repositories encapsulate SQL and map between database rows and plain
//! row structs; conversion to domain types happens in the adapters.
//!
//! # Architecture
//!
//! - Runtime-checked queries (`sqlx::query_as` with `FromRow` rows)
//! - Write methods take a connection so callers can compose a transaction
//! - Optimistic concurrency on the bill `version` column

pub mod billing;

pub use billing::BillingRepository;
