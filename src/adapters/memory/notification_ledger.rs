//! In-memory NotificationLedger.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::{DomainError, DunningRecordId};
use crate::ports::{NotificationLedger, NotificationRecord};

/// In-memory notification ledger keyed by (record, kind).
#[derive(Default)]
pub struct InMemoryNotificationLedger {
    sent: RwLock<HashMap<(DunningRecordId, NotificationKind), NotificationRecord>>,
}

impl InMemoryNotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded for one dunning record.
    pub async fn for_record(&self, record_id: &DunningRecordId) -> Vec<NotificationRecord> {
        self.sent
            .read()
            .await
            .values()
            .filter(|r| &r.dunning_record_id == record_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationLedger for InMemoryNotificationLedger {
    async fn contains(
        &self,
        record_id: &DunningRecordId,
        kind: NotificationKind,
    ) -> Result<bool, DomainError> {
        Ok(self.sent.read().await.contains_key(&(*record_id, kind)))
    }

    async fn record_sent(&self, entry: &NotificationRecord) -> Result<bool, DomainError> {
        let mut sent = self.sent.write().await;
        let key = (entry.dunning_record_id, entry.kind);
        if sent.contains_key(&key) {
            return Ok(false);
        }
        sent.insert(key, entry.clone());
        Ok(true)
    }
}
