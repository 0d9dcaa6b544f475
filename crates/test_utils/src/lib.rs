//! Test Utilities Crate
//!
//! Shared test infrastructure for the clinic billing workspace.
//!
//! # Modules
//!
//! - `fixtures`: patients, line items and payment requests with fixed values
//! - `builders`: bill builder and a seeded in-memory service
//! - `database`: PostgreSQL testcontainer with migrations applied
//! - `assertions`: bill, settlement and audit assertions
//! - `generators`: proptest strategies for line items and selections

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
