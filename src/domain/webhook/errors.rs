//! Webhook error types.
//!
//! The variants are the gateway's rejection taxonomy. Callers branch on the
//! variant, and the HTTP adapter maps it to an acknowledgment status.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur while accepting a provider webhook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Signature did not match the body and shared secret.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Timestamp is outside the tolerance window.
    #[error("Stale event: {0}")]
    StaleEvent(String),

    /// The event id was already recorded. Acknowledged without side effects.
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// Header or body could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The idempotency ledger could not be read or written.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Ledger(_))
    }

    /// True for outcomes that are acknowledged as success.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, WebhookError::DuplicateEvent(_))
    }

    /// Maps the error to the acknowledgment status.
    ///
    /// - 200: duplicate, acknowledged again
    /// - 400: rejected, nothing recorded
    /// - 500: nothing recorded, provider redelivers
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::DuplicateEvent(_) => StatusCode::OK,
            WebhookError::InvalidSignature
            | WebhookError::StaleEvent(_)
            | WebhookError::ParseError(_) => StatusCode::BAD_REQUEST,
            WebhookError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for response bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::StaleEvent(_) => "STALE_EVENT",
            WebhookError::DuplicateEvent(_) => "DUPLICATE_EVENT",
            WebhookError::ParseError(_) => "PARSE_ERROR",
            WebhookError::Ledger(_) => "LEDGER_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticity_failures_are_bad_requests() {
        assert_eq!(WebhookError::InvalidSignature.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            WebhookError::StaleEvent("age 400s".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::ParseError("bad json".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn duplicate_is_acknowledged() {
        let err = WebhookError::DuplicateEvent("evt_1".into());
        assert!(err.is_acknowledged());
        assert_eq!(err.status_code(), StatusCode::OK);
    }

    #[test]
    fn only_ledger_failures_ask_for_redelivery() {
        assert!(WebhookError::Ledger("db down".into()).is_retryable());
        assert!(!WebhookError::InvalidSignature.is_retryable());
        assert_eq!(
            WebhookError::Ledger("db down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn display_includes_detail() {
        assert_eq!(
            WebhookError::DuplicateEvent("evt_9".into()).to_string(),
            "Duplicate event: evt_9"
        );
    }
}
