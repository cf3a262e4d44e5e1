//! In-memory PaymentEventLedger.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, ProviderEventId, Timestamp};
use crate::ports::{PaymentEvent, PaymentEventLedger, PaymentEventStatus, SaveResult};

/// In-memory payment event ledger.
#[derive(Default)]
pub struct InMemoryPaymentEventLedger {
    events: RwLock<HashMap<ProviderEventId, PaymentEvent>>,
}

impl InMemoryPaymentEventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn update(
        &self,
        event_id: &ProviderEventId,
        f: impl FnOnce(&mut PaymentEvent),
    ) -> Result<(), DomainError> {
        let mut events = self.events.write().await;
        let entry = events.get_mut(event_id).ok_or_else(|| {
            DomainError::new(ErrorCode::NotFound, "Payment event not found")
                .with_detail("event_id", event_id.as_str())
        })?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl PaymentEventLedger for InMemoryPaymentEventLedger {
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<PaymentEvent>, DomainError> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn record(&self, event: &PaymentEvent) -> Result<SaveResult, DomainError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.provider_event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        events.insert(event.provider_event_id.clone(), event.clone());
        Ok(SaveResult::Inserted)
    }

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), DomainError> {
        self.update(event_id, |e| {
            e.status = PaymentEventStatus::Processed;
            e.dispatch_attempts += 1;
            e.error_message = None;
        })
        .await
    }

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), DomainError> {
        self.update(event_id, |e| {
            e.status = PaymentEventStatus::Failed;
            e.dispatch_attempts += 1;
            e.error_message = Some(error.to_string());
        })
        .await
    }

    async fn mark_ignored(
        &self,
        event_id: &ProviderEventId,
        reason: &str,
    ) -> Result<(), DomainError> {
        self.update(event_id, |e| {
            e.status = PaymentEventStatus::Ignored;
            e.dispatch_attempts += 1;
            e.error_message = Some(reason.to_string());
        })
        .await
    }

    async fn find_unprocessed(
        &self,
        received_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<PaymentEvent>, DomainError> {
        let events = self.events.read().await;
        let mut pending: Vec<_> = events
            .values()
            .filter(|e| {
                e.status.needs_dispatch()
                    && e.received_at.is_before(&received_before)
                    && e.dispatch_attempts < max_attempts
            })
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.received_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}
