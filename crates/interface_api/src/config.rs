//! API configuration

use serde::{Deserialize, Serialize};

use domain_billing::BillingConfig;

/// Where bills and receipts are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; data is lost on restart
    Memory,
    /// PostgreSQL at `database_url`
    Postgres,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database URL, used when `storage` is `postgres`
    pub database_url: String,
    pub db_max_connections: u32,
    /// Log level
    pub log_level: String,
    pub storage: StorageBackend,
    /// Require override amounts to match the selected items
    pub strict_amount_mode: bool,
    pub default_due_days: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/clinic_billing".to_string(),
            db_max_connections: 10,
            log_level: "info".to_string(),
            storage: StorageBackend::Memory,
            strict_amount_mode: false,
            default_due_days: 30,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from `API_`-prefixed environment variables
    ///
    /// Unset variables keep their default value.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&ApiConfig::default())?)
            .add_source(config::Environment::with_prefix("API").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Billing settings derived from this configuration
    pub fn billing_config(&self) -> BillingConfig {
        BillingConfig {
            strict_amount_mode: self.strict_amount_mode,
            default_due_days: self.default_due_days,
            ..BillingConfig::default()
        }
    }
}
