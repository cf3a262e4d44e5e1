//! HTTP DTOs for the dunning endpoints.

use serde::{Deserialize, Serialize};

use crate::application::AcceptedEvent;
use crate::domain::dunning::DunningRecord;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Operator request to open a dunning cycle directly.
#[derive(Debug, Clone, Deserialize)]
pub struct FailedPaymentRequest {
    pub subscription_id: String,
    pub invoice_id: String,
    /// Failure detail shown to operators.
    #[serde(default)]
    pub reason: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// A dunning record as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DunningRecordResponse {
    pub id: String,
    pub user_id: String,
    pub subscription_id: String,
    pub invoice_id: String,
    /// One of `started`, `retry_scheduled`, `retrying`, `recovered`,
    /// `exhausted`, `canceled`.
    pub status: String,
    pub attempt_count: u32,
    /// RFC 3339, only while a retry is scheduled.
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub cancellation_pending: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&DunningRecord> for DunningRecordResponse {
    fn from(record: &DunningRecord) -> Self {
        Self {
            id: record.id.to_string(),
            user_id: record.user_id.to_string(),
            subscription_id: record.subscription_id.to_string(),
            invoice_id: record.invoice_id.to_string(),
            status: record.status.as_str().to_string(),
            attempt_count: record.attempt_count,
            next_retry_at: record.next_retry_at.map(|t| t.as_datetime().to_rfc3339()),
            last_error: record.last_error.clone(),
            cancellation_pending: record.cancellation_pending,
            created_at: record.created_at.as_datetime().to_rfc3339(),
            updated_at: record.updated_at.as_datetime().to_rfc3339(),
        }
    }
}

/// Acknowledgment returned to the webhook sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    /// `accepted`, `duplicate` or `ignored`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl WebhookAck {
    pub fn for_event(accepted: &AcceptedEvent) -> Self {
        let status = if accepted.is_unrecognized() {
            "ignored"
        } else {
            "accepted"
        };
        Self {
            received: true,
            status: status.to_string(),
            event_id: Some(accepted.event_id.to_string()),
        }
    }

    pub fn duplicate(event_id: impl Into<String>) -> Self {
        Self {
            received: true,
            status: "duplicate".to_string(),
            event_id: Some(event_id.into()),
        }
    }
}

/// Error body: `{ "code": ..., "message": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
