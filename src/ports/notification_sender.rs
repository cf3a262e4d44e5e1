//! NotificationSender port - Delivers dunning messages to users.
//!
//! The dispatcher treats every failure here as non-fatal; billing state never
//! depends on delivery.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::UserId;

/// Delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("No recipient address for user {0}")]
    MissingRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Delivery timed out")]
    Timeout,
}

/// Port for sending user-facing notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends one notification. `data` carries template values such as
    /// `email`, `subscription_id`, `invoice_id` and `next_retry_at`.
    async fn send_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        data: &serde_json::Value,
    ) -> Result<(), NotificationError>;
}
