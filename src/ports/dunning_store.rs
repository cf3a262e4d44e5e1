//! DunningStore port - Persistence for dunning records and the local
//! subscription mirror.
//!
//! Every record write is version-checked. The writer sets
//! `record.version = expected + 1` and the store rejects the write with
//! `ErrorCode::ConcurrencyConflict` unless the stored version still equals
//! `expected`. Callers re-read and recompute on conflict.
//!
//! Subscription status is only ever changed through a [`SubscriptionChange`]
//! resolved *inside* the store's atomic unit, so the decision sees the same
//! set of open cycles the commit does.

use async_trait::async_trait;

use crate::domain::billing::{Subscription, SubscriptionChange, SubscriptionStatus};
use crate::domain::dunning::DunningRecord;
use crate::domain::foundation::{
    DomainError, DunningRecordId, InvoiceId, SubscriptionId, Timestamp,
};

/// Result of creating a dunning record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateResult {
    /// The record was inserted.
    Created,
    /// A record for the same (subscription, invoice) already exists.
    AlreadyExists(DunningRecord),
}

/// Port for dunning record and subscription persistence.
///
/// Implementations must enforce UNIQUE(subscription_id, invoice_id) on
/// records and run each method as a single atomic unit.
#[async_trait]
pub trait DunningStore: Send + Sync {
    /// Inserts a new record and applies `change` to its subscription in the
    /// same atomic unit.
    ///
    /// Returns `AlreadyExists` with the stored record when the key is taken;
    /// nothing is written in that case.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` when `change` is set and the subscription is
    ///   not stored locally
    async fn create_dunning_record(
        &self,
        record: &DunningRecord,
        change: Option<SubscriptionChange>,
    ) -> Result<CreateResult, DomainError>;

    /// Replaces the record if the stored version equals `expected_version`.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` on version mismatch
    /// - `DunningRecordNotFound` if the record does not exist
    async fn update_dunning_record_if_version(
        &self,
        record: &DunningRecord,
        expected_version: u64,
    ) -> Result<(), DomainError>;

    /// Version-checked record update plus an optional subscription change,
    /// committed together or not at all.
    ///
    /// The change is resolved against the number of *other* active records
    /// for the subscription as seen inside the atomic unit. Returns the
    /// subscription status after the commit, `None` when no change was
    /// requested or the subscription is not stored locally.
    async fn transactional_update_subscription_and_dunning(
        &self,
        record: &DunningRecord,
        expected_version: u64,
        change: Option<SubscriptionChange>,
    ) -> Result<Option<SubscriptionStatus>, DomainError>;

    /// Finds the record for a (subscription, invoice) pair.
    async fn find_dunning_record(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
    ) -> Result<Option<DunningRecord>, DomainError>;

    /// Finds a record by id.
    async fn find_dunning_record_by_id(
        &self,
        id: &DunningRecordId,
    ) -> Result<Option<DunningRecord>, DomainError>;

    /// Non-terminal records for a subscription, oldest first.
    async fn find_active_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<DunningRecord>, DomainError>;

    /// Most recently created record for a subscription, any status.
    async fn find_latest_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError>;

    /// `RetryScheduled` records with `next_retry_at <= now`, ascending by
    /// `next_retry_at`.
    async fn find_due_retries(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError>;

    /// `Retrying` records last updated before `claimed_before`.
    async fn find_stale_claims(
        &self,
        claimed_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError>;

    /// `Exhausted` records still waiting for the provider cancellation.
    async fn find_pending_cancellations(
        &self,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError>;

    /// Loads the local subscription mirror.
    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts or refreshes the local subscription mirror.
    ///
    /// Status of an existing row is left untouched; it only moves through
    /// [`SubscriptionChange`].
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Applies a change to a subscription outside of any record update.
    ///
    /// Returns the resulting status, `None` if the subscription is unknown.
    async fn apply_subscription_change(
        &self,
        id: &SubscriptionId,
        change: SubscriptionChange,
    ) -> Result<Option<SubscriptionStatus>, DomainError>;
}
