//! Stripe credentials and charge deadlines

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Where charges go and how webhooks are authenticated.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,

    /// Maximum age of a webhook timestamp, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    /// Deadline for a single charge call, in seconds
    #[serde(default = "default_charge_timeout")]
    pub charge_timeout_secs: u64,

    /// Stripe API base URL (overridden for local stubs)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl PaymentConfig {
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    pub fn charge_timeout(&self) -> Duration {
        Duration::from_secs(self.charge_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::Missing("DUNNING__PAYMENT__STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::Missing(
                "DUNNING__PAYMENT__STRIPE_WEBHOOK_SECRET",
            ));
        }
        // A publishable key here would fail every charge at runtime.
        if !self.stripe_api_key.starts_with("sk_") && !self.stripe_api_key.starts_with("rk_") {
            return Err(ValidationError::invalid(
                "DUNNING__PAYMENT__STRIPE_API_KEY",
                "expected a secret (sk_) or restricted (rk_) key",
            ));
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::invalid(
                "DUNNING__PAYMENT__STRIPE_WEBHOOK_SECRET",
                "expected a whsec_ signing secret",
            ));
        }
        if !(1..=3600).contains(&self.webhook_tolerance_secs) {
            return Err(ValidationError::out_of_range(
                "DUNNING__PAYMENT__WEBHOOK_TOLERANCE_SECS",
                "between 1 and 3600",
            ));
        }
        if !(1..=120).contains(&self.charge_timeout_secs) {
            return Err(ValidationError::out_of_range(
                "DUNNING__PAYMENT__CHARGE_TIMEOUT_SECS",
                "between 1 and 120",
            ));
        }
        if !self.api_base_url.starts_with("https://") && !self.api_base_url.starts_with("http://") {
            return Err(ValidationError::invalid(
                "DUNNING__PAYMENT__API_BASE_URL",
                self.api_base_url.clone(),
            ));
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            webhook_tolerance_secs: default_webhook_tolerance(),
            charge_timeout_secs: default_charge_timeout(),
            api_base_url: default_api_base_url(),
        }
    }
}

fn default_webhook_tolerance() -> u64 {
    300
}

fn default_charge_timeout() -> u64 {
    10
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}
