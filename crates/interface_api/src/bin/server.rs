//! Clinic Billing - API Server Binary
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage
//! cargo run --bin clinic-billing-api
//!
//! # PostgreSQL storage
//! API_STORAGE=postgres API_DATABASE_URL=postgres://... cargo run --bin clinic-billing-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST` - Server host (default: 0.0.0.0)
//! * `API_PORT` - Server port (default: 8080)
//! * `API_STORAGE` - `memory` or `postgres` (default: memory)
//! * `API_DATABASE_URL` - PostgreSQL connection string
//! * `API_DB_MAX_CONNECTIONS` - Pool size (default: 10)
//! * `API_LOG_LEVEL` - Log level when `RUST_LOG` is unset (default: info)
//! * `API_STRICT_AMOUNT_MODE` - Require overrides to equal the computed amount
//! * `API_DEFAULT_DUE_DAYS` - Days until a new bill is due (default: 30)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_billing::BillingService;
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter};
use interface_api::config::{ApiConfig, StorageBackend};
use interface_api::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env().context("invalid API configuration")?;

    init_tracing(&config.log_level);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        storage = ?config.storage,
        strict_amount_mode = config.strict_amount_mode,
        "Starting clinic billing API server"
    );

    let service = build_service(&config).await?;
    let app = create_router(AppState::new(service, config.clone()));

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .with_context(|| format!("invalid server address {}", config.server_addr()))?;

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Builds the billing service over the configured storage
async fn build_service(config: &ApiConfig) -> anyhow::Result<BillingService> {
    let billing = config.billing_config();
    billing.validate().context("invalid billing configuration")?;

    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; bills are lost on restart");
            Ok(BillingService::in_memory(billing))
        }
        StorageBackend::Postgres => {
            let db_config =
                DatabaseConfig::new(config.database_url.clone()).max_connections(config.db_max_connections);
            let pool = create_pool(db_config)
                .await
                .context("failed to connect to database")?;
            run_migrations(&pool).await.context("failed to run migrations")?;

            let adapter = PostgresBillingAdapter::new(pool).with_config(&billing);
            Ok(BillingService::new(Arc::new(adapter), billing))
        }
    }
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
