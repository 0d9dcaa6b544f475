//! HTTP API Layer
//!
//! REST API for clinic bill payment reconciliation using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: thin adapters from HTTP to `BillingService`
//! - **Middleware**: request ids, request logging, tracing, CORS
//! - **DTOs**: request validation and response shapes
//! - **Error Handling**: `BillingError` kinds mapped to status codes
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let state = AppState::new(BillingService::in_memory(config.billing_config()), config);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use domain_billing::BillingService;

use crate::config::ApiConfig;
use crate::handlers::{billing, health};
use crate::middleware::request_logging_middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BillingService>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(service: BillingService, config: ApiConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
        }
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let bill_routes = Router::new()
        .route("/", post(billing::create_bill))
        .route("/:id", get(billing::get_bill))
        .route("/:id/items", get(billing::list_items).post(billing::append_items))
        .route("/:id/receipts", get(billing::list_receipts))
        .route("/:id/payments", post(billing::record_payment))
        .route("/:id/audit", get(billing::audit_bill));

    let receipt_routes = Router::new()
        .route("/:id", get(billing::get_receipt))
        .route("/:id/void", post(billing::void_receipt))
        .route("/:id/refund", post(billing::refund_receipt));

    let api_routes = Router::new()
        .nest("/bills", bill_routes)
        .nest("/receipts", receipt_routes)
        .route("/bill-numbers/:number", get(billing::get_bill_by_number))
        .route("/patients/:id/bills", get(billing::list_patient_bills));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(axum_middleware::from_fn(request_logging_middleware)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
