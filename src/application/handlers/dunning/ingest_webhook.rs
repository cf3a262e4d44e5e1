//! WebhookIngestionGateway - authenticated, deduplicated entry for provider
//! events.
//!
//! `accept` does everything that must happen before the provider is
//! acknowledged: verify, dedupe and record. `dispatch` runs the engine and
//! may happen after the acknowledgment; its failures are left in the ledger
//! for the retry scheduler to replay.

use std::sync::Arc;

use super::engine::DunningEngine;
use crate::domain::dunning::DunningError;
use crate::domain::foundation::{ProviderEventId, Timestamp};
use crate::domain::webhook::{
    InboundEvent, ProviderEventEnvelope, SignatureHeader, WebhookError, WebhookVerifier,
};
use crate::ports::{PaymentEvent, PaymentEventLedger, SaveResult};

/// An event that passed verification and was recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEvent {
    pub event_id: ProviderEventId,
    pub event_type: String,
    pub event: InboundEvent,
}

impl AcceptedEvent {
    /// True when dispatch would be a no-op.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self.event, InboundEvent::Unrecognized { .. })
    }
}

/// Webhook entry point for the dunning engine.
pub struct WebhookIngestionGateway {
    verifier: WebhookVerifier,
    ledger: Arc<dyn PaymentEventLedger>,
    engine: Arc<DunningEngine>,
}

impl WebhookIngestionGateway {
    pub fn new(
        verifier: WebhookVerifier,
        ledger: Arc<dyn PaymentEventLedger>,
        engine: Arc<DunningEngine>,
    ) -> Self {
        Self {
            verifier,
            ledger,
            engine,
        }
    }

    /// Verifies, parses and records an inbound webhook.
    ///
    /// Nothing is recorded unless the signature and timestamp check out and
    /// the body parses.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` / `StaleEvent` / `ParseError` - rejected
    /// - `DuplicateEvent` - already recorded, acknowledge without dispatch
    /// - `Ledger` - the ledger could not be read or written
    pub async fn accept(
        &self,
        payload: &[u8],
        signature: &SignatureHeader,
    ) -> Result<AcceptedEvent, WebhookError> {
        self.verifier
            .verify_at(payload, signature, Timestamp::now().as_unix_secs())?;

        let envelope = ProviderEventEnvelope::parse(payload)?;
        let event_id = envelope.event_id()?;

        if self
            .ledger
            .find_by_event_id(&event_id)
            .await
            .map_err(|e| WebhookError::Ledger(e.to_string()))?
            .is_some()
        {
            tracing::info!(event_id = %event_id, "Duplicate webhook acknowledged");
            return Err(WebhookError::DuplicateEvent(event_id.to_string()));
        }

        let event = envelope.to_inbound_event()?;
        let entry = PaymentEvent::received(
            event_id.clone(),
            envelope.event_type.clone(),
            event.clone(),
            Timestamp::now(),
        );

        match self
            .ledger
            .record(&entry)
            .await
            .map_err(|e| WebhookError::Ledger(e.to_string()))?
        {
            SaveResult::Inserted => {}
            SaveResult::AlreadyExists => {
                tracing::info!(event_id = %event_id, "Concurrent duplicate webhook acknowledged");
                return Err(WebhookError::DuplicateEvent(event_id.to_string()));
            }
        }

        tracing::info!(
            event_id = %event_id,
            event_type = %envelope.event_type,
            kind = event.name(),
            "Webhook accepted"
        );

        Ok(AcceptedEvent {
            event_id,
            event_type: envelope.event_type,
            event,
        })
    }

    /// Applies an accepted event and settles its ledger entry.
    ///
    /// Retryable failures mark the entry failed for replay. Anything else
    /// (unknown subscription, invalid state, unhandled event type) is settled
    /// as ignored.
    pub async fn dispatch(&self, accepted: &AcceptedEvent) -> Result<(), DunningError> {
        if let InboundEvent::Unrecognized { event_type } = &accepted.event {
            let reason = format!("unhandled event type {}", event_type);
            if let Err(e) = self.ledger.mark_ignored(&accepted.event_id, &reason).await {
                tracing::warn!(event_id = %accepted.event_id, error = %e, "Failed to mark event ignored");
            }
            return Ok(());
        }
        self.dispatch_event(&accepted.event_id, &accepted.event).await
    }

    /// Replays a ledger entry whose earlier dispatch did not complete.
    pub async fn replay(&self, entry: &PaymentEvent) -> Result<(), DunningError> {
        tracing::info!(
            event_id = %entry.provider_event_id,
            attempts = entry.dispatch_attempts,
            "Replaying webhook event"
        );
        self.dispatch_event(&entry.provider_event_id, &entry.event)
            .await
    }

    /// `accept` then `dispatch` inline.
    ///
    /// Dispatch failures are not returned: the event was accepted and the
    /// failure is already in the ledger.
    pub async fn receive(
        &self,
        payload: &[u8],
        signature: &SignatureHeader,
    ) -> Result<AcceptedEvent, WebhookError> {
        let accepted = self.accept(payload, signature).await?;
        if let Err(e) = self.dispatch(&accepted).await {
            tracing::warn!(event_id = %accepted.event_id, error = %e, "Inline dispatch failed");
        }
        Ok(accepted)
    }

    async fn dispatch_event(
        &self,
        event_id: &ProviderEventId,
        event: &InboundEvent,
    ) -> Result<(), DunningError> {
        match self.engine.apply(event).await {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_processed(event_id).await {
                    tracing::warn!(event_id = %event_id, error = %e, "Failed to mark event processed");
                }
                Ok(())
            }
            Err(err) => {
                let settle = if err.is_retryable() {
                    tracing::warn!(event_id = %event_id, error = %err, "Event dispatch failed, will replay");
                    self.ledger.mark_failed(event_id, &err.to_string()).await
                } else {
                    tracing::warn!(event_id = %event_id, error = %err, "Event dispatch rejected, not replaying");
                    self.ledger.mark_ignored(event_id, &err.to_string()).await
                };
                if let Err(e) = settle {
                    tracing::error!(event_id = %event_id, error = %e, "Failed to settle ledger entry");
                }
                Err(err)
            }
        }
    }
}
