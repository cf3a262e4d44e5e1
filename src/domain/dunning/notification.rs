//! Notification kinds emitted by dunning transitions.

use serde::{Deserialize, Serialize};

/// Message sent to the user when a dunning record changes.
///
/// Each kind is sent at most once per dunning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The original payment failed; a retry is scheduled.
    PaymentFailed,
    /// A retry failed; another one is scheduled.
    RetryScheduled,
    PaymentRecovered,
    /// Retries are exhausted; the subscription is being canceled.
    SubscriptionWillCancel,
    SubscriptionCanceled,
}

impl NotificationKind {
    /// Stable name used as the template key and ledger key.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::RetryScheduled => "retry_scheduled",
            NotificationKind::PaymentRecovered => "payment_recovered",
            NotificationKind::SubscriptionWillCancel => "subscription_will_cancel",
            NotificationKind::SubscriptionCanceled => "subscription_canceled",
        }
    }

    /// Parses a name produced by [`NotificationKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        [
            NotificationKind::PaymentFailed,
            NotificationKind::RetryScheduled,
            NotificationKind::PaymentRecovered,
            NotificationKind::SubscriptionWillCancel,
            NotificationKind::SubscriptionCanceled,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
