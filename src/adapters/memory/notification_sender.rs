//! Notification sender that records instead of delivering.
//!
//! Used by tests and by local runs without email credentials.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::UserId;
use crate::ports::{NotificationError, NotificationSender};

/// One captured notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub data: serde_json::Value,
}

/// Captures every notification; optionally fails or stalls every delivery.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleeps for `delay` before every delivery.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All captured notifications, oldest first.
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    /// Number of captured notifications of one kind.
    pub async fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        data: &serde_json::Value,
    ) -> Result<(), NotificationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(NotificationError::Delivery("recording sender set to fail".to_string()));
        }
        tracing::debug!(user_id = %user_id, kind = %kind, "Recorded notification");
        self.sent.lock().await.push(SentNotification {
            user_id: user_id.clone(),
            kind,
            data: data.clone(),
        });
        Ok(())
    }
}
