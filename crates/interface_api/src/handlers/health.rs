//! Liveness and readiness checks

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use core_kernel::HealthCheckResult;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<HealthCheckResult>,
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process is up; does not touch storage
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: VERSION,
        storage: None,
    })
}

/// Ready once the billing storage passes its health check; 503 otherwise
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = state.service.health().await;

    let (code, status) = if storage.is_healthy() {
        (StatusCode::OK, "ready")
    } else {
        tracing::warn!(adapter = %storage.adapter_id, message = ?storage.message, "Storage not ready");
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: VERSION,
            storage: Some(storage),
        }),
    )
}
