//! Payment provider port for charging invoices and managing subscriptions.
//!
//! # Design
//!
//! - **Gateway agnostic**: Interface works with any payment provider
//! - **Idempotent charges**: every charge carries a caller-derived key so a
//!   retried network call has effect at most once
//! - **Classified failures**: every error says whether it should consume a
//!   dunning attempt

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::SubscriptionStatus;
use crate::domain::foundation::{
    CustomerId, DomainError, ErrorCode, InvoiceId, SubscriptionId, Timestamp, UserId,
};

/// Port for payment provider integrations.
#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    /// Fetches a subscription, `None` if the provider does not know it.
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<ProviderSubscription>, PaymentError>;

    /// Attempts to collect an open invoice.
    ///
    /// Repeating a call with the same `idempotency_key` must return the
    /// original result rather than charging again.
    async fn charge_invoice(
        &self,
        invoice_id: &InvoiceId,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, PaymentError>;

    /// Cancels the subscription immediately.
    async fn cancel_subscription(&self, subscription_id: &SubscriptionId)
        -> Result<(), PaymentError>;
}

/// Subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub customer_email: Option<String>,
    /// From the subscription's `metadata.user_id`.
    pub user_id: Option<UserId>,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
}

/// Successful charge result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// This call collected the invoice.
    Paid,
    /// The invoice was already paid (earlier attempt or out of band).
    AlreadyPaid,
}

/// Whether a failure consumes a dunning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Infrastructure trouble. Retry soon, attempt not consumed.
    Transient,
    /// Business rejection. Attempt consumed.
    Permanent,
}

/// Payment provider error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentError {
    /// Error code for categorization.
    pub code: PaymentErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,
}

impl PaymentError {
    /// Create a new payment error.
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    /// Create with provider code.
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    /// Create a card declined error.
    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::CardDeclined, message)
    }

    /// Create a provider-side (5xx) error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ProviderUnavailable, message)
    }

    /// Create a not found error.
    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    /// Classifies this error for the dunning engine.
    pub fn classify(&self) -> FailureClass {
        self.code.classify()
    }

    /// True if the failure should not consume an attempt.
    pub fn is_transient(&self) -> bool {
        self.classify() == FailureClass::Transient
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for DomainError {
    fn from(err: PaymentError) -> Self {
        let code = match err.code {
            PaymentErrorCode::NotFound => ErrorCode::NotFound,
            _ => ErrorCode::PaymentProviderError,
        };
        DomainError::new(code, err.message).with_detail("payment_error", err.code.to_string())
    }
}

/// Payment error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Network connectivity issue.
    NetworkError,

    /// Call exceeded its deadline.
    Timeout,

    /// Rate limit exceeded.
    RateLimitExceeded,

    /// Provider returned 5xx.
    ProviderUnavailable,

    /// API authentication failed (our credentials, not the customer's card).
    AuthenticationError,

    /// Card was declined.
    CardDeclined,

    /// Insufficient funds.
    InsufficientFunds,

    /// Card expired.
    CardExpired,

    /// Other 4xx rejection.
    InvalidRequest,

    /// Resource not found.
    NotFound,

    /// Unknown error.
    Unknown,
}

impl PaymentErrorCode {
    /// Check if this error type is typically retryable without user action.
    pub fn is_retryable(&self) -> bool {
        self.classify() == FailureClass::Transient
    }

    /// Maps the code to its dunning classification.
    ///
    /// Authentication and unknown failures are ours, not the customer's, so
    /// they never burn an attempt.
    pub fn classify(&self) -> FailureClass {
        match self {
            PaymentErrorCode::NetworkError
            | PaymentErrorCode::Timeout
            | PaymentErrorCode::RateLimitExceeded
            | PaymentErrorCode::ProviderUnavailable
            | PaymentErrorCode::AuthenticationError
            | PaymentErrorCode::Unknown => FailureClass::Transient,
            PaymentErrorCode::CardDeclined
            | PaymentErrorCode::InsufficientFunds
            | PaymentErrorCode::CardExpired
            | PaymentErrorCode::InvalidRequest
            | PaymentErrorCode::NotFound => FailureClass::Permanent,
        }
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::ProviderUnavailable => "provider_unavailable",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::CardDeclined => "card_declined",
            PaymentErrorCode::InsufficientFunds => "insufficient_funds",
            PaymentErrorCode::CardExpired => "card_expired",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
