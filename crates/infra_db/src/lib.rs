//! Infrastructure Database Layer
//!
//! This crate provides PostgreSQL persistence for clinic billing using SQLx:
//! connection pooling, migrations, the billing repository and the
//! `PostgresBillingAdapter` implementing `domain_billing::BillingPort`.
//!
//! # Architecture
//!
//! The crate follows the repository pattern. Repositories own the SQL,
//! adapters own the translation to domain types and the transaction
//! boundaries of each port operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, PostgresBillingAdapter};
//!
//! let pool = create_pool_from_url("postgres://localhost/clinic_billing").await?;
//! run_migrations(&pool).await?;
//! let adapter = PostgresBillingAdapter::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::PostgresBillingAdapter;
pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use repositories::BillingRepository;
