//! Port plumbing shared by every storage adapter
//!
//! ```text
//!        BillingService / PaymentProcessor
//!                       │
//!                       ▼
//!        BillingPort (domain_billing::ports)
//!             ▲                     ▲
//!   InMemoryBillingAdapter   PostgresBillingAdapter
//! ```
//!
//! Adapters report failures as [`PortError`]; the domain maps those into its
//! own error taxonomy and never sees sqlx or lock errors directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by a port implementation
#[derive(Debug, Error)]
pub enum PortError {
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// The write would break a bill invariant (amount above balance, reversal of a reversed receipt)
    #[error("Rejected write: {message}")]
    Validation { message: String },

    /// Stored state moved since it was read, or a unique key is already taken
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Storage is unreachable
    #[error("Storage unavailable: {message}")]
    Connection { message: String },

    #[error("Storage failure: {message}")]
    Internal { message: String },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal { message: message.into() }
    }

    /// Only lost connections may succeed when repeated unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PortError::Conflict { .. })
    }
}

/// Marker for port traits; implementations must be shareable across tasks
pub trait DomainPort: Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Unhealthy,
}

/// Outcome of checking an adapter's backing store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub adapter_id: String,
    pub status: AdapterHealth,
    /// Round trip of the check
    pub latency_ms: u64,
    /// Failure detail when unhealthy
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(adapter_id: impl Into<String>, latency_ms: u64) -> Self {
        Self::at_now(adapter_id.into(), AdapterHealth::Healthy, latency_ms, None)
    }

    pub fn unhealthy(adapter_id: impl Into<String>, latency_ms: u64, message: impl Into<String>) -> Self {
        Self::at_now(adapter_id.into(), AdapterHealth::Unhealthy, latency_ms, Some(message.into()))
    }

    pub fn is_healthy(&self) -> bool {
        self.status == AdapterHealth::Healthy
    }

    fn at_now(adapter_id: String, status: AdapterHealth, latency_ms: u64, message: Option<String>) -> Self {
        Self {
            adapter_id,
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}

/// Who asked for a port call, carried into adapter logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMetadata {
    /// Request id propagated from the HTTP layer
    pub correlation_id: Option<String>,
    /// Cashier or clerk performing the operation
    pub initiated_by: Option<String>,
}

impl OperationMetadata {
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            initiated_by: None,
        }
    }

    pub fn initiated_by(mut self, actor: impl Into<String>) -> Self {
        self.initiated_by = Some(actor.into());
        self
    }
}
