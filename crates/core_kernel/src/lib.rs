//! Core Kernel - Foundational types for the clinic billing system
//!
//! This crate provides the building blocks shared by the billing domain,
//! its storage adapters and the HTTP surface:
//! - Money with precise decimal arithmetic
//! - Strongly-typed identifiers
//! - Port plumbing for swappable storage adapters

pub mod money;
pub mod identifiers;
pub mod ports;

pub use money::{Money, MoneyError};
pub use identifiers::{BillId, ReceiptId, PatientId, VisitId, ServiceId};
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth,
    OperationMetadata,
};
