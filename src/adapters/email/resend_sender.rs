//! Resend notification sender - delivers dunning emails over the Resend API.
//!
//! # Configuration
//!
//! ```ignore
//! let config = ResendConfig::new(api_key, "Billing <billing@example.com>");
//! let sender = ResendNotificationSender::new(config);
//! ```
//!
//! The recipient comes from `data.email`, which the engine fills from the
//! subscription's customer email.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::UserId;
use crate::ports::{NotificationError, NotificationSender};

/// Configuration for the Resend sender.
#[derive(Clone)]
pub struct ResendConfig {
    api_key: SecretString,
    /// Value of the `from` field, e.g. `Billing <billing@example.com>`.
    pub from: String,
    /// Optional `reply_to` address.
    pub reply_to: Option<String>,
    /// Base URL for the API (default: https://api.resend.com).
    pub base_url: String,
    pub timeout: Duration,
}

impl ResendConfig {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            from: from.into(),
            reply_to: None,
            base_url: "https://api.resend.com".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_reply_to(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sends dunning notifications as plain-text email.
pub struct ResendNotificationSender {
    config: ResendConfig,
    client: Client,
}

impl ResendNotificationSender {
    pub fn new(config: ResendConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self { config, client }
    }

    fn emails_url(&self) -> String {
        format!("{}/emails", self.config.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl NotificationSender for ResendNotificationSender {
    async fn send_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        data: &serde_json::Value,
    ) -> Result<(), NotificationError> {
        let to = data
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| NotificationError::MissingRecipient(user_id.to_string()))?;

        let (subject, text) = render(kind, data);
        let email = ResendEmail {
            from: &self.config.from,
            to: vec![to],
            reply_to: self.config.reply_to.as_deref(),
            subject,
            text,
        };

        let response = self
            .client
            .post(self.emails_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&email)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout
                } else {
                    NotificationError::Delivery(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ResendErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("Resend API error ({})", status.as_u16()));
            return Err(NotificationError::Delivery(message));
        }

        tracing::debug!(user_id = %user_id, kind = %kind, "Dunning email sent");
        Ok(())
    }
}

/// Subject and body for a notification kind.
fn render(kind: NotificationKind, data: &serde_json::Value) -> (String, String) {
    let field = |name: &str| {
        data.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    let invoice = field("invoice_id");
    let next_retry = data
        .get("next_retry_at")
        .and_then(|v| v.as_str())
        .unwrap_or("soon")
        .to_string();

    match kind {
        NotificationKind::PaymentFailed => (
            "Your payment failed".to_string(),
            format!(
                "We could not collect payment for invoice {}. We will try again on {}. \
                 Please check that your payment method is up to date.",
                invoice, next_retry
            ),
        ),
        NotificationKind::RetryScheduled => (
            "We will retry your payment".to_string(),
            format!(
                "Another attempt to collect invoice {} failed. The next attempt is on {}.",
                invoice, next_retry
            ),
        ),
        NotificationKind::PaymentRecovered => (
            "Payment received".to_string(),
            format!(
                "Thanks! Invoice {} is paid and your subscription is active.",
                invoice
            ),
        ),
        NotificationKind::SubscriptionWillCancel => (
            "Your subscription will be canceled".to_string(),
            format!(
                "We could not collect invoice {} after several attempts, so your \
                 subscription is being canceled.",
                invoice
            ),
        ),
        NotificationKind::SubscriptionCanceled => (
            "Your subscription was canceled".to_string(),
            format!(
                "Your subscription {} has been canceled. No further payment attempts \
                 will be made.",
                field("subscription_id")
            ),
        ),
    }
}
