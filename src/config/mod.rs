//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `DUNNING` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use dunning_engine::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Max attempts: {}", config.dunning.max_attempts);
//! ```

mod database;
mod dunning;
mod email;
mod error;
mod payment;
mod server;

pub use database::DatabaseConfig;
pub use dunning::DunningConfig;
pub use email::EmailConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Payment configuration (Stripe)
    pub payment: PaymentConfig,

    /// Email configuration (Resend)
    pub email: EmailConfig,

    /// Retry policy and scheduler tuning
    #[serde(default)]
    pub dunning: DunningConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `DUNNING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `DUNNING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `DUNNING__DUNNING__MAX_ATTEMPTS=4` -> `dunning.max_attempts = 4`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("DUNNING")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate()?;
        self.email.validate()?;
        self.dunning.validate()?;

        // Every scheduler worker can hold a connection; the API needs one more.
        if self.database.max_connections as usize <= self.dunning.worker_concurrency {
            return Err(ValidationError::Inconsistent {
                first: "DUNNING__DATABASE__MAX_CONNECTIONS",
                second: "DUNNING__DUNNING__WORKER_CONCURRENCY",
            });
        }
        // Manual retries charge inside the request.
        if self.server.request_timeout_secs <= self.payment.charge_timeout_secs {
            return Err(ValidationError::Inconsistent {
                first: "DUNNING__SERVER__REQUEST_TIMEOUT_SECS",
                second: "DUNNING__PAYMENT__CHARGE_TIMEOUT_SECS",
            });
        }
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
