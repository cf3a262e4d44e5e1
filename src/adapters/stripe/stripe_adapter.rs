//! Stripe payment provider adapter.
//!
//! Implements `PaymentProviderClient` over the Stripe REST API.
//!
//! # Security
//!
//! - The API key is held in a `secrecy::SecretString` and only exposed to
//!   build the basic-auth header
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key).with_timeout(Duration::from_secs(10));
//! let adapter = StripePaymentAdapter::new(config);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::domain::foundation::{
    CustomerId, InvoiceId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{
    ChargeOutcome, PaymentError, PaymentErrorCode, PaymentProviderClient, ProviderSubscription,
};

use super::api_types::{StripeErrorResponse, StripeInvoice, StripeSubscription};

/// Stripe error code for paying an invoice that is already settled.
const INVOICE_ALREADY_PAID: &str = "invoice_already_paid";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Per-request deadline enforced by the HTTP client.
    timeout: Duration,
}

impl StripeConfig {
    /// Create a new Stripe configuration.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    /// Create a new Stripe adapter with the given configuration.
    pub fn new(config: StripeConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            config,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, PaymentError> {
        request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn error_from(response: reqwest::Response) -> PaymentError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        map_stripe_error(status, &body)
    }
}

#[async_trait]
impl PaymentProviderClient for StripePaymentAdapter {
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        let url = self.url(&format!("/v1/subscriptions/{}", subscription_id));
        let response = self
            .send(self.http_client.get(&url).query(&[("expand[]", "customer")]))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let stripe_sub: StripeSubscription = response.json().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::Unknown,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;

        to_provider_subscription(stripe_sub).map(Some)
    }

    async fn charge_invoice(
        &self,
        invoice_id: &InvoiceId,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        let url = self.url(&format!("/v1/invoices/{}/pay", invoice_id));
        let response = self
            .send(
                self.http_client
                    .post(&url)
                    .header("Idempotency-Key", idempotency_key)
                    .form(&[("off_session", "true")]),
            )
            .await?;

        if !response.status().is_success() {
            let error = Self::error_from(response).await;
            if error.provider_code.as_deref() == Some(INVOICE_ALREADY_PAID) {
                tracing::info!(invoice_id = %invoice_id, "Invoice already paid at provider");
                return Ok(ChargeOutcome::AlreadyPaid);
            }
            tracing::warn!(
                invoice_id = %invoice_id,
                code = %error.code,
                provider_code = ?error.provider_code,
                "Stripe invoice payment failed"
            );
            return Err(error);
        }

        let invoice: StripeInvoice = response.json().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::Unknown,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;

        if invoice.paid || invoice.status.as_deref() == Some("paid") {
            Ok(ChargeOutcome::Paid)
        } else {
            Err(PaymentError::card_declined(format!(
                "invoice {} is {}",
                invoice.id,
                invoice.status.as_deref().unwrap_or("unpaid")
            )))
        }
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<(), PaymentError> {
        let url = self.url(&format!("/v1/subscriptions/{}", subscription_id));
        let response = self.send(self.http_client.delete(&url)).await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::timeout(e.to_string())
    } else {
        PaymentError::network(e.to_string())
    }
}

fn to_provider_subscription(sub: StripeSubscription) -> Result<ProviderSubscription, PaymentError> {
    let invalid = |e: crate::domain::foundation::ValidationError| {
        PaymentError::new(PaymentErrorCode::Unknown, e.to_string())
    };
    let status = sub.local_status();
    Ok(ProviderSubscription {
        id: SubscriptionId::new(sub.id.clone()).map_err(invalid)?,
        customer_id: CustomerId::new(sub.customer.id()).map_err(invalid)?,
        customer_email: sub.customer.email().map(str::to_string),
        user_id: sub
            .metadata
            .get("user_id")
            .and_then(|id| UserId::new(id.clone()).ok()),
        status,
        current_period_end: sub.current_period_end.and_then(Timestamp::from_unix_secs),
        cancel_at_period_end: sub.cancel_at_period_end,
    })
}

/// Maps an HTTP status and Stripe error body to a classified error.
pub(crate) fn map_stripe_error(status: u16, body: &str) -> PaymentError {
    let parsed = serde_json::from_str::<StripeErrorResponse>(body).ok();
    let error = parsed.as_ref().map(|p| &p.error);
    let message = error
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("Stripe API error ({})", status));
    let provider_code = error.and_then(|e| e.decline_code.clone().or_else(|| e.code.clone()));
    let error_type = error.and_then(|e| e.error_type.as_deref());

    let code = match status {
        429 => PaymentErrorCode::RateLimitExceeded,
        500..=599 => PaymentErrorCode::ProviderUnavailable,
        401 | 403 => PaymentErrorCode::AuthenticationError,
        404 => PaymentErrorCode::NotFound,
        _ if status == 402 || error_type == Some("card_error") => {
            match provider_code.as_deref() {
                Some("insufficient_funds") => PaymentErrorCode::InsufficientFunds,
                Some("expired_card") => PaymentErrorCode::CardExpired,
                _ => PaymentErrorCode::CardDeclined,
            }
        }
        400..=499 => PaymentErrorCode::InvalidRequest,
        _ => PaymentErrorCode::Unknown,
    };

    let mut err = PaymentError::new(code, message);
    if let Some(provider_code) = provider_code {
        err = err.with_provider_code(provider_code);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FailureClass;

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new("sk_test_key");
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_with_base_url() {
        let config = StripeConfig::new("key").with_base_url("http://localhost:8080");
        assert_eq!(config.api_base_url, "http://localhost:8080");
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Error Mapping Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn card_error_with_decline_code_is_permanent() {
        let body = r#"{"error":{"type":"card_error","code":"card_declined","decline_code":"insufficient_funds","message":"Insufficient funds"}}"#;
        let err = map_stripe_error(402, body);
        assert_eq!(err.code, PaymentErrorCode::InsufficientFunds);
        assert_eq!(err.provider_code.as_deref(), Some("insufficient_funds"));
        assert_eq!(err.classify(), FailureClass::Permanent);
    }

    #[test]
    fn expired_card_maps_to_card_expired() {
        let body = r#"{"error":{"type":"card_error","code":"expired_card","message":"Expired"}}"#;
        assert_eq!(map_stripe_error(402, body).code, PaymentErrorCode::CardExpired);
    }

    #[test]
    fn server_errors_are_transient() {
        let err = map_stripe_error(503, "upstream unavailable");
        assert_eq!(err.code, PaymentErrorCode::ProviderUnavailable);
        assert!(err.is_transient());
        assert_eq!(err.message, "Stripe API error (503)");
    }

    #[test]
    fn rate_limit_is_transient() {
        assert!(map_stripe_error(429, "{}").is_transient());
    }

    #[test]
    fn other_client_errors_are_invalid_requests() {
        let body = r#"{"error":{"type":"invalid_request_error","code":"parameter_missing","message":"Missing"}}"#;
        let err = map_stripe_error(400, body);
        assert_eq!(err.code, PaymentErrorCode::InvalidRequest);
        assert_eq!(err.provider_code.as_deref(), Some("parameter_missing"));
    }

    #[test]
    fn already_paid_code_is_preserved() {
        let body = r#"{"error":{"type":"invalid_request_error","code":"invoice_already_paid","message":"Invoice is already paid"}}"#;
        let err = map_stripe_error(400, body);
        assert_eq!(err.provider_code.as_deref(), Some(INVOICE_ALREADY_PAID));
    }

    #[test]
    fn provider_subscription_reads_user_metadata() {
        let json = r#"{
            "id": "sub_1",
            "customer": { "id": "cus_1", "email": "ada@example.com" },
            "status": "active",
            "metadata": { "user_id": "user-1" }
        }"#;
        let sub = to_provider_subscription(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(sub.user_id, Some(UserId::new("user-1").unwrap()));
        assert_eq!(sub.customer_email.as_deref(), Some("ada@example.com"));
    }
}
