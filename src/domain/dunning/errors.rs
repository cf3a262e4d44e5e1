//! Dunning error taxonomy.
//!
//! | Error | Consumes an attempt | Surfaced as |
//! |-------|---------------------|-------------|
//! | TransientProviderError | no | short cool-down, scheduler re-attempts |
//! | PermanentPaymentFailure | yes | drives the transition table |
//! | PersistenceConflict | no | recomputed; surfaced after bounded retries |
//! | NotificationDeliveryError | no | logged only |
//! | RecordNotFound / SubscriptionNotFound | n/a | 404 |
//! | InvalidState | n/a | 409 |
//! | Infrastructure | n/a | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Errors raised while driving a dunning record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DunningError {
    /// Transport failure, timeout, rate limit or 5xx from the provider.
    #[error("Transient provider error: {0}")]
    TransientProviderError(String),

    /// Declined card or other business rejection.
    #[error("Payment failed: {0}")]
    PermanentPaymentFailure(String),

    /// The record changed underneath every bounded retry.
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    /// A notification could not be delivered.
    #[error("Notification delivery failed: {0}")]
    NotificationDeliveryError(String),

    #[error("Dunning record not found: {0}")]
    RecordNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The requested operation is not valid for the record's status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl DunningError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DunningError::TransientProviderError(_) | DunningError::PermanentPaymentFailure(_) => {
                ErrorCode::PaymentProviderError
            }
            DunningError::PersistenceConflict(_) => ErrorCode::ConcurrencyConflict,
            DunningError::NotificationDeliveryError(_) => ErrorCode::NotificationError,
            DunningError::RecordNotFound(_) => ErrorCode::DunningRecordNotFound,
            DunningError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            DunningError::InvalidState(_) => ErrorCode::InvalidStateTransition,
            DunningError::Infrastructure(_) => ErrorCode::InternalError,
        }
    }

    /// Returns true if repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DunningError::TransientProviderError(_)
                | DunningError::PersistenceConflict(_)
                | DunningError::Infrastructure(_)
        )
    }
}

impl From<DomainError> for DunningError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ConcurrencyConflict => DunningError::PersistenceConflict(err.message),
            ErrorCode::DunningRecordNotFound => DunningError::RecordNotFound(err.message),
            ErrorCode::SubscriptionNotFound => DunningError::SubscriptionNotFound(err.message),
            ErrorCode::InvalidStateTransition => DunningError::InvalidState(err.message),
            _ => DunningError::Infrastructure(err.to_string()),
        }
    }
}
