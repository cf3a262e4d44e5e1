//! NotificationLedger port - One message per (dunning record, kind).

use async_trait::async_trait;

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::{DomainError, DunningRecordId, Timestamp};

/// Audit entry for a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub dunning_record_id: DunningRecordId,
    pub kind: NotificationKind,
    pub sent_at: Timestamp,
}

/// Port for the outbound notification ledger.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// True if this pair was already sent.
    async fn contains(
        &self,
        record_id: &DunningRecordId,
        kind: NotificationKind,
    ) -> Result<bool, DomainError>;

    /// Records a delivered notification. Recording an existing pair is a
    /// no-op that returns `false`.
    async fn record_sent(&self, entry: &NotificationRecord) -> Result<bool, DomainError>;
}
