//! PaymentEventLedger port - Idempotency ledger for inbound provider events.
//!
//! The provider delivers at least once. The ledger turns that into at most
//! once side effects: an event id is inserted exactly once, and a second
//! delivery finds the row and is acknowledged without dispatch.
//!
//! Entries also carry the parsed [`InboundEvent`] and a status, so an event
//! whose dispatch failed after the acknowledgment can be replayed by the
//! retry scheduler instead of relying on re-delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, ProviderEventId, Timestamp};
use crate::domain::webhook::InboundEvent;

/// Processing status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventStatus {
    /// Recorded, dispatch not yet completed.
    Pending,
    /// Dispatched to the engine successfully.
    Processed,
    /// Acknowledged but not acted on (unrecognized type).
    Ignored,
    /// Dispatch failed; eligible for replay.
    Failed,
}

impl PaymentEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventStatus::Pending => "pending",
            PaymentEventStatus::Processed => "processed",
            PaymentEventStatus::Ignored => "ignored",
            PaymentEventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentEventStatus::Pending),
            "processed" => Some(PaymentEventStatus::Processed),
            "ignored" => Some(PaymentEventStatus::Ignored),
            "failed" => Some(PaymentEventStatus::Failed),
            _ => None,
        }
    }

    /// True if the entry still needs a dispatch.
    pub fn needs_dispatch(&self) -> bool {
        matches!(self, PaymentEventStatus::Pending | PaymentEventStatus::Failed)
    }
}

/// Ledger entry for one provider event id.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub provider_event_id: ProviderEventId,

    /// Provider event type (e.g., "invoice.payment_failed").
    pub event_type: String,

    pub received_at: Timestamp,

    pub status: PaymentEventStatus,

    /// Parsed event, kept for replay.
    pub event: InboundEvent,

    /// Last dispatch error, if any.
    pub error_message: Option<String>,

    /// Dispatch attempts so far.
    pub dispatch_attempts: u32,
}

impl PaymentEvent {
    /// Creates a pending entry. Unrecognized events are recorded as ignored.
    pub fn received(
        provider_event_id: ProviderEventId,
        event_type: impl Into<String>,
        event: InboundEvent,
        received_at: Timestamp,
    ) -> Self {
        let status = match event {
            InboundEvent::Unrecognized { .. } => PaymentEventStatus::Ignored,
            _ => PaymentEventStatus::Pending,
        };
        Self {
            provider_event_id,
            event_type: event_type.into(),
            received_at,
            status,
            event,
            error_message: None,
            dispatch_attempts: 0,
        }
    }
}

/// Result of attempting to record an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted (first time seeing this event).
    Inserted,
    /// Record already exists (duplicate event).
    AlreadyExists,
}

/// Port for the inbound event ledger.
///
/// Implementations should use a PRIMARY KEY on the provider event id so
/// concurrent deliveries of one event race safely.
#[async_trait]
pub trait PaymentEventLedger: Send + Sync {
    /// Finds an entry by provider event id.
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<PaymentEvent>, DomainError>;

    /// Inserts the entry with `ON CONFLICT DO NOTHING` semantics.
    async fn record(&self, event: &PaymentEvent) -> Result<SaveResult, DomainError>;

    /// Marks a dispatch as completed.
    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), DomainError>;

    /// Marks a dispatch as failed and bumps the attempt counter.
    async fn mark_failed(&self, event_id: &ProviderEventId, error: &str)
        -> Result<(), DomainError>;

    /// Marks an entry as settled without effect; it will not be replayed.
    async fn mark_ignored(&self, event_id: &ProviderEventId, reason: &str)
        -> Result<(), DomainError>;

    /// Pending or failed entries received before `received_before` with
    /// fewer than `max_attempts` dispatches, oldest first.
    async fn find_unprocessed(
        &self,
        received_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<PaymentEvent>, DomainError>;
}
