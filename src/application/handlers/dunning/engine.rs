//! DunningEngine - drives dunning records through their state machine.
//!
//! Every transition is an optimistic read-modify-write: load the record,
//! apply the domain method, write it back conditioned on the version that
//! was read. A version conflict reloads and recomputes, bounded by
//! `max_conflict_retries`. The webhook gateway and the retry scheduler can
//! race on the same record; whichever commits second recomputes against the
//! winner's state and usually finds nothing left to do.
//!
//! Provider calls are never made inside a transition. A charge happens
//! between the claim (RETRY_SCHEDULED -> RETRYING) and the write of its
//! result, and always carries the record's idempotency key, so a crash in
//! between is resolved by charging again with the same key.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::lifecycle::SubscriptionLifecycleManager;
use super::notifications::NotificationDispatcher;
use crate::domain::billing::{Subscription, SubscriptionChange, SubscriptionStatus};
use crate::domain::dunning::{
    DeclineOutcome, DunningError, DunningPolicy, DunningRecord, DunningStatus, NotificationKind,
};
use crate::domain::foundation::{DunningRecordId, InvoiceId, SubscriptionId, Timestamp};
use crate::domain::webhook::InboundEvent;
use crate::ports::{
    ChargeOutcome, CreateResult, DunningStore, PaymentError, PaymentErrorCode,
    PaymentProviderClient,
};

/// Engine tuning that is not part of the dunning policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Reload-and-recompute attempts after a version conflict.
    pub max_conflict_retries: u32,

    /// Deadline for a single charge call.
    pub charge_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            charge_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one charge attempt on a claimed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The invoice was paid.
    Recovered(DunningRecord),
    /// Declined; another attempt is scheduled.
    Rescheduled(DunningRecord),
    /// Declined on the last attempt.
    Exhausted(DunningRecord),
    /// Transient provider error; re-attempt after the cool-down.
    Deferred(DunningRecord),
    /// Nothing to do: not due, already claimed, or moved on concurrently.
    Skipped(DunningRecord),
}

impl RetryOutcome {
    pub fn record(&self) -> &DunningRecord {
        match self {
            RetryOutcome::Recovered(r)
            | RetryOutcome::Rescheduled(r)
            | RetryOutcome::Exhausted(r)
            | RetryOutcome::Deferred(r)
            | RetryOutcome::Skipped(r) => r,
        }
    }

    pub fn into_record(self) -> DunningRecord {
        match self {
            RetryOutcome::Recovered(r)
            | RetryOutcome::Rescheduled(r)
            | RetryOutcome::Exhausted(r)
            | RetryOutcome::Deferred(r)
            | RetryOutcome::Skipped(r) => r,
        }
    }
}

/// Result of an optimistic mutation.
enum Mutation<T> {
    Applied(DunningRecord, T),
    Unchanged(DunningRecord),
}

/// How a claimed record should be resolved after the charge call.
enum ChargeResult {
    Paid,
    Transient(PaymentError),
    Declined(PaymentError),
}

/// The dunning state machine service.
pub struct DunningEngine {
    store: Arc<dyn DunningStore>,
    provider: Arc<dyn PaymentProviderClient>,
    notifications: NotificationDispatcher,
    lifecycle: SubscriptionLifecycleManager,
    policy: DunningPolicy,
    settings: EngineSettings,
}

impl DunningEngine {
    pub fn new(
        store: Arc<dyn DunningStore>,
        provider: Arc<dyn PaymentProviderClient>,
        notifications: NotificationDispatcher,
        policy: DunningPolicy,
        settings: EngineSettings,
    ) -> Self {
        let lifecycle = SubscriptionLifecycleManager::new(store.clone(), provider.clone());
        Self {
            store,
            provider,
            notifications,
            lifecycle,
            policy,
            settings,
        }
    }

    pub fn policy(&self) -> &DunningPolicy {
        &self.policy
    }

    // ════════════════════════════════════════════════════════════════════════
    // Inbound events
    // ════════════════════════════════════════════════════════════════════════

    /// Applies a parsed provider event.
    pub async fn apply(&self, event: &InboundEvent) -> Result<(), DunningError> {
        match event {
            InboundEvent::PaymentFailed {
                subscription_id,
                invoice_id,
                reason,
            } => {
                self.handle_failed_payment(subscription_id, invoice_id, reason.clone())
                    .await?;
            }
            InboundEvent::PaymentSucceeded {
                subscription_id,
                invoice_id,
            } => {
                self.handle_payment_succeeded(subscription_id, invoice_id)
                    .await?;
            }
            InboundEvent::SubscriptionDeleted { subscription_id } => {
                self.handle_subscription_deleted(subscription_id).await?;
            }
            InboundEvent::Unrecognized { event_type } => {
                tracing::info!(event_type = %event_type, "Ignoring unrecognized event");
            }
        }
        Ok(())
    }

    /// Opens a dunning cycle for a failed invoice, or returns the existing one.
    ///
    /// Idempotent per (subscription, invoice): a repeat, or a stale failure
    /// arriving after the cycle already ended, returns the stored record
    /// untouched.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` when neither the store nor the provider knows
    ///   the subscription, or it carries no user to notify
    /// - `InvalidState` when the subscription is canceled or paused
    pub async fn handle_failed_payment(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
        reason: Option<String>,
    ) -> Result<DunningRecord, DunningError> {
        if let Some(existing) = self
            .store
            .find_dunning_record(subscription_id, invoice_id)
            .await?
        {
            tracing::debug!(
                record_id = %existing.id,
                status = existing.status.as_str(),
                "Dunning record already exists, ignoring failed payment"
            );
            return Ok(existing);
        }

        let subscription = self.ensure_subscription(subscription_id).await?;
        match subscription.status {
            SubscriptionStatus::Active | SubscriptionStatus::PastDue => {}
            other => {
                return Err(DunningError::InvalidState(format!(
                    "subscription {} is {}",
                    subscription_id,
                    other.as_str()
                )));
            }
        }

        let now = Timestamp::now();
        let record = DunningRecord::start(
            subscription.user_id.clone(),
            subscription_id.clone(),
            invoice_id.clone(),
            reason,
            &self.policy,
            now,
        );
        let change = SubscriptionLifecycleManager::change_for(None, record.status);

        match self.store.create_dunning_record(&record, change).await? {
            CreateResult::Created => {
                tracing::info!(
                    record_id = %record.id,
                    subscription_id = %subscription_id,
                    invoice_id = %invoice_id,
                    next_retry_at = ?record.next_retry_at,
                    "Dunning cycle started"
                );
                self.notify(&record, NotificationKind::PaymentFailed).await;
                Ok(record)
            }
            CreateResult::AlreadyExists(existing) => {
                tracing::debug!(record_id = %existing.id, "Lost creation race, using existing record");
                Ok(existing)
            }
        }
    }

    /// Marks the cycle for an invoice recovered after an out-of-band payment.
    ///
    /// Returns `None` when the invoice never entered dunning; a closed
    /// record is stored for it so a failure delivered late stays a no-op.
    /// A terminal record is returned unchanged.
    pub async fn handle_payment_succeeded(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
    ) -> Result<Option<DunningRecord>, DunningError> {
        let record = match self
            .store
            .find_dunning_record(subscription_id, invoice_id)
            .await?
        {
            Some(record) => record,
            None => match self.settle_paid_invoice(subscription_id, invoice_id).await? {
                Some(opened) => opened,
                None => return Ok(None),
            },
        };

        let now = Timestamp::now();
        let mutation = self
            .mutate(&record.id, |r| {
                if !r.is_active() {
                    return Ok(None);
                }
                r.recover(now)?;
                Ok(Some(()))
            })
            .await?;

        match mutation {
            Mutation::Applied(record, ()) => {
                tracing::info!(
                    record_id = %record.id,
                    subscription_id = %subscription_id,
                    attempt = record.attempt_count,
                    "Dunning cycle recovered out of band"
                );
                self.notify(&record, NotificationKind::PaymentRecovered).await;
                Ok(Some(record))
            }
            Mutation::Unchanged(record) => Ok(Some(record)),
        }
    }

    /// Stores a closed record for an invoice paid outside dunning.
    ///
    /// Returns the record a concurrent failure created first, if any, so the
    /// caller can recover it instead.
    async fn settle_paid_invoice(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
    ) -> Result<Option<DunningRecord>, DunningError> {
        let subscription = match self.ensure_subscription(subscription_id).await {
            Ok(subscription) => subscription,
            Err(DunningError::SubscriptionNotFound(reason)) => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    invoice_id = %invoice_id,
                    reason = %reason,
                    "Payment succeeded for unknown subscription"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let settled = DunningRecord::settled(
            subscription.user_id,
            subscription_id.clone(),
            invoice_id.clone(),
            Timestamp::now(),
        );
        match self.store.create_dunning_record(&settled, None).await? {
            CreateResult::Created => {
                tracing::debug!(
                    record_id = %settled.id,
                    subscription_id = %subscription_id,
                    invoice_id = %invoice_id,
                    "Invoice paid outside dunning, settled"
                );
                Ok(None)
            }
            CreateResult::AlreadyExists(existing) => Ok(Some(existing)),
        }
    }

    /// Cancels every open cycle of a deleted subscription.
    ///
    /// Returns the records this call moved to CANCELED. Exhausted records
    /// still flagged for cancellation are settled by the scheduler, whose
    /// provider call then finds the subscription gone.
    pub async fn handle_subscription_deleted(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<DunningRecord>, DunningError> {
        let now = Timestamp::now();
        let mut canceled = Vec::new();

        for record in self.store.find_active_for_subscription(subscription_id).await? {
            let mutation = self
                .mutate(&record.id, |r| {
                    if !r.is_active() {
                        return Ok(None);
                    }
                    r.cancel(now)?;
                    Ok(Some(()))
                })
                .await?;
            if let Mutation::Applied(record, ()) = mutation {
                tracing::info!(
                    record_id = %record.id,
                    subscription_id = %subscription_id,
                    "Dunning cycle canceled with subscription"
                );
                self.notify(&record, NotificationKind::SubscriptionCanceled)
                    .await;
                canceled.push(record);
            }
        }

        self.store
            .apply_subscription_change(subscription_id, SubscriptionChange::Cancel)
            .await?;

        Ok(canceled)
    }

    // ════════════════════════════════════════════════════════════════════════
    // Retries
    // ════════════════════════════════════════════════════════════════════════

    /// Claims a due record and attempts the charge.
    ///
    /// Returns `Skipped` when the record is not (or no longer) due, which is
    /// the normal result for a record another worker claimed first.
    pub async fn process_due_retry(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<RetryOutcome, DunningError> {
        let now = Timestamp::now();
        let claim = self
            .mutate(record_id, |r| {
                if !r.is_due(now) {
                    return Ok(None);
                }
                r.claim(now)?;
                Ok(Some(()))
            })
            .await?;

        match claim {
            Mutation::Applied(record, ()) => self.charge(record).await,
            Mutation::Unchanged(record) => Ok(RetryOutcome::Skipped(record)),
        }
    }

    /// Operator-initiated retry that ignores `next_retry_at`.
    ///
    /// # Errors
    ///
    /// - `RecordNotFound` for an unknown id
    /// - `InvalidState` unless the record is RETRY_SCHEDULED
    pub async fn retry_now(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<DunningRecord, DunningError> {
        let now = Timestamp::now();
        let claim = self
            .mutate(record_id, |r| {
                if r.status != DunningStatus::RetryScheduled {
                    return Err(DunningError::InvalidState(format!(
                        "cannot retry a record that is {}",
                        r.status.as_str()
                    )));
                }
                r.claim(now)?;
                Ok(Some(()))
            })
            .await?;

        let outcome = match claim {
            Mutation::Applied(record, ()) => {
                tracing::info!(record_id = %record.id, "Manual retry requested");
                self.charge(record).await?
            }
            Mutation::Unchanged(record) => RetryOutcome::Skipped(record),
        };
        Ok(outcome.into_record())
    }

    /// Re-charges a record left RETRYING by a worker that never finished.
    ///
    /// The record is re-claimed by a version bump first so only one sweeper
    /// resumes it. The charge reuses the original idempotency key, so a
    /// charge that did succeed before the crash is reported as already paid.
    pub async fn resume_stale_claim(
        &self,
        record_id: &DunningRecordId,
        claimed_before: Timestamp,
    ) -> Result<RetryOutcome, DunningError> {
        let now = Timestamp::now();
        let reclaim = self
            .mutate(record_id, |r| {
                if r.status != DunningStatus::Retrying || !r.updated_at.is_before(&claimed_before)
                {
                    return Ok(None);
                }
                r.updated_at = now;
                Ok(Some(()))
            })
            .await?;

        match reclaim {
            Mutation::Applied(record, ()) => {
                tracing::warn!(
                    record_id = %record.id,
                    attempt = record.attempt_count,
                    "Resuming stale retry claim"
                );
                self.charge(record).await
            }
            Mutation::Unchanged(record) => Ok(RetryOutcome::Skipped(record)),
        }
    }

    /// Finishes the cancellation of an exhausted record's subscription.
    ///
    /// Returns `false` when the provider call failed; the record stays
    /// pending and is picked up again by the scheduler.
    pub async fn complete_cancellation(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<bool, DunningError> {
        let record = self.load(record_id).await?;
        if !record.cancellation_pending {
            return Ok(true);
        }

        match self
            .lifecycle
            .cancel_subscription(&record.subscription_id)
            .await
        {
            Ok(_) => {
                self.clear_cancellation_pending(record_id).await?;
                Ok(true)
            }
            Err(e) if e.is_retryable() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Queries
    // ════════════════════════════════════════════════════════════════════════

    /// Current dunning state of a subscription: the oldest open cycle if
    /// any, otherwise the most recent one.
    pub async fn get_dunning_status(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DunningError> {
        let active = self.store.find_active_for_subscription(subscription_id).await?;
        if let Some(record) = active.into_iter().next() {
            return Ok(Some(record));
        }
        Ok(self.store.find_latest_for_subscription(subscription_id).await?)
    }

    /// Waits for notifications still being delivered in the background.
    pub async fn flush_notifications(&self) {
        self.notifications.drain().await;
    }

    /// Loads a record by id.
    pub async fn get_record(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<Option<DunningRecord>, DunningError> {
        Ok(self.store.find_dunning_record_by_id(record_id).await?)
    }

    // ════════════════════════════════════════════════════════════════════════
    // Internals
    // ════════════════════════════════════════════════════════════════════════

    /// Calls the provider for a claimed record and commits the result.
    async fn charge(&self, claimed: DunningRecord) -> Result<RetryOutcome, DunningError> {
        let key = claimed.provider_idempotency_key();
        let attempt = claimed.attempt_count;

        tracing::info!(
            record_id = %claimed.id,
            invoice_id = %claimed.invoice_id,
            attempt = attempt,
            "Charging invoice"
        );

        let call = self.provider.charge_invoice(&claimed.invoice_id, &key);
        let result = match tokio::time::timeout(self.settings.charge_timeout, call).await {
            Ok(Ok(ChargeOutcome::Paid)) | Ok(Ok(ChargeOutcome::AlreadyPaid)) => ChargeResult::Paid,
            Ok(Err(e)) if e.is_transient() => ChargeResult::Transient(e),
            Ok(Err(e)) => ChargeResult::Declined(e),
            Err(_) => ChargeResult::Transient(PaymentError::new(
                PaymentErrorCode::Timeout,
                format!(
                    "charge exceeded {}ms",
                    self.settings.charge_timeout.as_millis()
                ),
            )),
        };

        let now = Timestamp::now();
        let policy = &self.policy;
        let still_claimed =
            move |r: &DunningRecord| r.status == DunningStatus::Retrying && r.attempt_count == attempt;

        match result {
            ChargeResult::Paid => {
                let mutation = self
                    .mutate(&claimed.id, |r| {
                        if !still_claimed(r) {
                            return Ok(None);
                        }
                        r.recover(now)?;
                        Ok(Some(()))
                    })
                    .await?;
                match mutation {
                    Mutation::Applied(record, ()) => {
                        tracing::info!(record_id = %record.id, attempt = attempt, "Invoice recovered");
                        self.notify(&record, NotificationKind::PaymentRecovered).await;
                        Ok(RetryOutcome::Recovered(record))
                    }
                    Mutation::Unchanged(record) => {
                        self.warn_moved_on(&record, "charge succeeded");
                        Ok(RetryOutcome::Skipped(record))
                    }
                }
            }
            ChargeResult::Transient(error) => {
                let retry_at = now.plus_duration(policy.transient_cooldown);
                let message = error.to_string();
                let mutation = self
                    .mutate(&claimed.id, |r| {
                        if !still_claimed(r) {
                            return Ok(None);
                        }
                        r.release_after_transient_error(message.clone(), retry_at, now)?;
                        Ok(Some(()))
                    })
                    .await?;
                match mutation {
                    Mutation::Applied(record, ()) => {
                        tracing::warn!(
                            record_id = %record.id,
                            attempt = attempt,
                            error = %error,
                            next_retry_at = ?record.next_retry_at,
                            "Transient provider error, attempt not consumed"
                        );
                        Ok(RetryOutcome::Deferred(record))
                    }
                    Mutation::Unchanged(record) => Ok(RetryOutcome::Skipped(record)),
                }
            }
            ChargeResult::Declined(error) => {
                let message = error.message.clone();
                let mutation = self
                    .mutate(&claimed.id, |r| {
                        if !still_claimed(r) {
                            return Ok(None);
                        }
                        Ok(Some(r.record_declined_charge(message.clone(), policy, now)?))
                    })
                    .await?;
                match mutation {
                    Mutation::Applied(record, DeclineOutcome::Rescheduled) => {
                        tracing::info!(
                            record_id = %record.id,
                            attempt = record.attempt_count,
                            error = %error,
                            next_retry_at = ?record.next_retry_at,
                            "Charge declined, retry scheduled"
                        );
                        self.notify(&record, NotificationKind::RetryScheduled).await;
                        Ok(RetryOutcome::Rescheduled(record))
                    }
                    Mutation::Applied(record, DeclineOutcome::Exhausted) => {
                        tracing::warn!(
                            record_id = %record.id,
                            subscription_id = %record.subscription_id,
                            attempt = record.attempt_count,
                            error = %error,
                            "Dunning exhausted, canceling subscription"
                        );
                        self.notify(&record, NotificationKind::SubscriptionWillCancel)
                            .await;
                        let record = match self.complete_cancellation(&record.id).await {
                            Ok(_) => self.load(&record.id).await?,
                            Err(e) => {
                                tracing::warn!(
                                    record_id = %record.id,
                                    error = %e,
                                    "Cancellation deferred to scheduler"
                                );
                                record
                            }
                        };
                        Ok(RetryOutcome::Exhausted(record))
                    }
                    Mutation::Unchanged(record) => Ok(RetryOutcome::Skipped(record)),
                }
            }
        }
    }

    async fn clear_cancellation_pending(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<(), DunningError> {
        let now = Timestamp::now();
        self.mutate(record_id, |r| {
            if !r.cancellation_pending {
                return Ok(None);
            }
            r.complete_cancellation(now);
            Ok(Some(()))
        })
        .await?;
        Ok(())
    }

    /// Optimistic read-modify-write on one record.
    ///
    /// `step` mutates the freshly loaded record and returns `None` to leave
    /// it untouched. The subscription change implied by the status move is
    /// committed in the same atomic unit.
    async fn mutate<T, F>(
        &self,
        record_id: &DunningRecordId,
        mut step: F,
    ) -> Result<Mutation<T>, DunningError>
    where
        F: FnMut(&mut DunningRecord) -> Result<Option<T>, DunningError> + Send,
        T: Send,
    {
        for attempt in 0..=self.settings.max_conflict_retries {
            let mut record = self.load(record_id).await?;
            let expected = record.version;
            let before = record.status;

            let Some(value) = step(&mut record)? else {
                return Ok(Mutation::Unchanged(record));
            };

            record.version = expected + 1;
            let change = SubscriptionLifecycleManager::change_for(Some(before), record.status);
            let written = match change {
                Some(change) => self
                    .store
                    .transactional_update_subscription_and_dunning(&record, expected, Some(change))
                    .await
                    .map(|_| ()),
                None => {
                    self.store
                        .update_dunning_record_if_version(&record, expected)
                        .await
                }
            };

            match written {
                Ok(()) => return Ok(Mutation::Applied(record, value)),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(
                        record_id = %record_id,
                        attempt = attempt,
                        expected_version = expected,
                        "Version conflict, recomputing transition"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(
            record_id = %record_id,
            retries = self.settings.max_conflict_retries,
            "Giving up after repeated version conflicts"
        );
        Err(DunningError::PersistenceConflict(format!(
            "record {} changed on every one of {} attempts",
            record_id,
            self.settings.max_conflict_retries + 1
        )))
    }

    async fn load(&self, record_id: &DunningRecordId) -> Result<DunningRecord, DunningError> {
        self.store
            .find_dunning_record_by_id(record_id)
            .await?
            .ok_or_else(|| DunningError::RecordNotFound(record_id.to_string()))
    }

    /// Local subscription, fetched from the provider and stored on first use.
    async fn ensure_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Subscription, DunningError> {
        if let Some(subscription) = self.store.get_subscription(subscription_id).await? {
            return Ok(subscription);
        }

        let remote = self
            .provider
            .retrieve_subscription(subscription_id)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    DunningError::TransientProviderError(e.to_string())
                } else {
                    DunningError::SubscriptionNotFound(format!("{}: {}", subscription_id, e))
                }
            })?
            .ok_or_else(|| DunningError::SubscriptionNotFound(subscription_id.to_string()))?;

        let user_id = remote.user_id.ok_or_else(|| {
            DunningError::SubscriptionNotFound(format!(
                "{} has no user_id metadata",
                subscription_id
            ))
        })?;

        let mut subscription = Subscription::new(remote.id, remote.customer_id, user_id)
            .with_status(remote.status);
        subscription.customer_email = remote.customer_email;
        subscription.current_period_end = remote.current_period_end;
        subscription.cancel_at_period_end = remote.cancel_at_period_end;

        self.store.upsert_subscription(&subscription).await?;
        tracing::info!(
            subscription_id = %subscription_id,
            user_id = %subscription.user_id,
            "Imported subscription from provider"
        );

        // Re-read so a concurrent import wins consistently.
        Ok(self
            .store
            .get_subscription(subscription_id)
            .await?
            .unwrap_or(subscription))
    }

    async fn notify(&self, record: &DunningRecord, kind: NotificationKind) {
        let email = match self.store.get_subscription(&record.subscription_id).await {
            Ok(subscription) => subscription.and_then(|s| s.customer_email),
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Could not load notification recipient");
                None
            }
        };
        let data = notification_data(record, email);
        self.notifications
            .dispatch_in_background(record.clone(), kind, data)
            .await;
    }

    fn warn_moved_on(&self, record: &DunningRecord, what: &str) {
        tracing::warn!(
            record_id = %record.id,
            status = record.status.as_str(),
            "Record moved on while {}, result discarded",
            what
        );
    }
}

fn notification_data(record: &DunningRecord, email: Option<String>) -> serde_json::Value {
    json!({
        "email": email,
        "dunning_record_id": record.id.to_string(),
        "subscription_id": record.subscription_id.as_str(),
        "invoice_id": record.invoice_id.as_str(),
        "attempt_count": record.attempt_count,
        "next_retry_at": record.next_retry_at.map(|t| t.as_datetime().to_rfc3339()),
        "last_error": record.last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryDunningStore, InMemoryNotificationLedger, RecordingNotificationSender,
    };
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::foundation::{CustomerId, UserId};
    use crate::ports::ProviderSubscription;

    struct Fixture {
        store: Arc<InMemoryDunningStore>,
        provider: Arc<MockPaymentProvider>,
        sender: Arc<RecordingNotificationSender>,
        engine: DunningEngine,
    }

    fn fixture_with(policy: DunningPolicy, settings: EngineSettings) -> Fixture {
        let store = Arc::new(InMemoryDunningStore::new());
        let provider = Arc::new(MockPaymentProvider::new());
        let sender = Arc::new(RecordingNotificationSender::new());
        let notifications = NotificationDispatcher::new(
            Arc::new(InMemoryNotificationLedger::new()),
            sender.clone(),
            Duration::from_secs(1),
        );
        let engine = DunningEngine::new(
            store.clone(),
            provider.clone(),
            notifications,
            policy,
            settings,
        );
        Fixture {
            store,
            provider,
            sender,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(DunningPolicy::default(), EngineSettings::default())
    }

    fn sub_id() -> SubscriptionId {
        SubscriptionId::new("sub_123").unwrap()
    }

    fn invoice(id: &str) -> InvoiceId {
        InvoiceId::new(id).unwrap()
    }

    async fn store_subscription(f: &Fixture, status: SubscriptionStatus) {
        let subscription = Subscription::new(
            sub_id(),
            CustomerId::new("cus_123").unwrap(),
            UserId::new("user-1").unwrap(),
        )
        .with_email("ada@example.com")
        .with_status(status);
        f.store.upsert_subscription(&subscription).await.unwrap();
    }

    async fn open_cycle(f: &Fixture) -> DunningRecord {
        store_subscription(f, SubscriptionStatus::Active).await;
        f.engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), Some("card_declined".into()))
            .await
            .unwrap()
    }

    async fn sent(f: &Fixture, kind: NotificationKind) -> usize {
        f.engine.flush_notifications().await;
        f.sender.count(kind).await
    }

    async fn subscription_status(f: &Fixture) -> SubscriptionStatus {
        f.store
            .get_subscription(&sub_id())
            .await
            .unwrap()
            .unwrap()
            .status
    }

    // ════════════════════════════════════════════════════════════════════════
    // Failed payments
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn failed_payment_opens_a_scheduled_cycle() {
        let f = fixture();
        let before = Timestamp::now();

        let record = open_cycle(&f).await;

        assert_eq!(record.status, DunningStatus::RetryScheduled);
        assert_eq!(record.attempt_count, 0);
        let next = record.next_retry_at.unwrap();
        assert!(!next.is_before(&before.plus_days(3)));
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::PastDue);
        assert_eq!(sent(&f, NotificationKind::PaymentFailed).await, 1);
    }

    #[tokio::test]
    async fn repeated_failed_payment_returns_the_same_record() {
        let f = fixture();
        let first = open_cycle(&f).await;

        let second = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.record_count().await, 1);
        assert_eq!(sent(&f, NotificationKind::PaymentFailed).await, 1);
    }

    #[tokio::test]
    async fn unknown_subscription_is_rejected() {
        let f = fixture();

        let result = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), None)
            .await;

        assert!(matches!(result, Err(DunningError::SubscriptionNotFound(_))));
        assert_eq!(f.store.record_count().await, 0);
    }

    #[tokio::test]
    async fn subscription_is_imported_from_the_provider() {
        let f = fixture();
        f.provider.add_subscription(ProviderSubscription {
            id: sub_id(),
            customer_id: CustomerId::new("cus_123").unwrap(),
            customer_email: Some("ada@example.com".into()),
            user_id: Some(UserId::new("user-1").unwrap()),
            status: SubscriptionStatus::Active,
            current_period_end: None,
            cancel_at_period_end: false,
        });

        let record = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), None)
            .await
            .unwrap();

        assert_eq!(record.user_id.as_str(), "user-1");
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn failed_payment_on_canceled_subscription_is_invalid() {
        let f = fixture();
        store_subscription(&f, SubscriptionStatus::Canceled).await;

        let result = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), None)
            .await;

        assert!(matches!(result, Err(DunningError::InvalidState(_))));
    }

    #[tokio::test]
    async fn failed_payment_on_paused_subscription_opens_nothing() {
        let f = fixture();
        store_subscription(&f, SubscriptionStatus::Paused).await;

        let result = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), None)
            .await;

        assert!(matches!(result, Err(DunningError::InvalidState(_))));
        assert_eq!(f.store.record_count().await, 0);
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Paused);
        assert_eq!(sent(&f, NotificationKind::PaymentFailed).await, 0);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Retries
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn declined_retry_schedules_the_next_attempt() {
        let f = fixture();
        let record = open_cycle(&f).await;
        f.provider
            .push_charge_result(Err(PaymentError::card_declined("declined")));

        let updated = f.engine.retry_now(&record.id).await.unwrap();

        assert_eq!(updated.status, DunningStatus::RetryScheduled);
        assert_eq!(updated.attempt_count, 1);
        assert_eq!(updated.last_error.as_deref(), Some("declined"));
        assert_eq!(sent(&f, NotificationKind::RetryScheduled).await, 1);
        assert_eq!(
            f.provider.charge_calls()[0].1,
            format!("dunning_{}_attempt_0", record.id)
        );
    }

    #[tokio::test]
    async fn last_decline_exhausts_and_cancels() {
        let f = fixture_with(
            DunningPolicy::default().with_max_attempts(2),
            EngineSettings::default(),
        );
        let record = open_cycle(&f).await;
        f.provider
            .set_default_charge_result(Err(PaymentError::card_declined("declined")));

        f.engine.retry_now(&record.id).await.unwrap();
        let exhausted = f.engine.retry_now(&record.id).await.unwrap();

        assert_eq!(exhausted.status, DunningStatus::Exhausted);
        assert_eq!(exhausted.attempt_count, 2);
        assert_eq!(exhausted.next_retry_at, None);
        assert!(!exhausted.cancellation_pending);
        assert_eq!(f.provider.cancel_calls(), vec![sub_id()]);
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Canceled);
        assert_eq!(
            sent(&f, NotificationKind::SubscriptionWillCancel).await,
            1
        );
    }

    #[tokio::test]
    async fn charge_timeout_defers_without_consuming_an_attempt() {
        let f = fixture_with(
            DunningPolicy::default(),
            EngineSettings {
                charge_timeout: Duration::from_millis(20),
                ..EngineSettings::default()
            },
        );
        let record = open_cycle(&f).await;
        f.provider.set_charge_delay(Duration::from_millis(500));

        let updated = f.engine.retry_now(&record.id).await.unwrap();

        assert_eq!(updated.status, DunningStatus::RetryScheduled);
        assert_eq!(updated.attempt_count, 0);
        assert!(updated.last_error.unwrap().contains("exceeded"));
    }

    #[tokio::test]
    async fn not_due_record_is_skipped() {
        let f = fixture();
        let record = open_cycle(&f).await;

        let outcome = f.engine.process_due_retry(&record.id).await.unwrap();

        assert!(matches!(outcome, RetryOutcome::Skipped(_)));
        assert!(f.provider.charge_calls().is_empty());
    }

    #[tokio::test]
    async fn manual_retry_requires_a_scheduled_record() {
        let f = fixture();
        let record = open_cycle(&f).await;
        f.engine.retry_now(&record.id).await.unwrap();

        let again = f.engine.retry_now(&record.id).await;
        let unknown = f.engine.retry_now(&DunningRecordId::new()).await;

        assert!(matches!(again, Err(DunningError::InvalidState(_))));
        assert!(matches!(unknown, Err(DunningError::RecordNotFound(_))));
    }

    // ════════════════════════════════════════════════════════════════════════
    // Out-of-band events
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn payment_succeeded_recovers_the_cycle() {
        let f = fixture();
        let record = open_cycle(&f).await;

        let recovered = f
            .engine
            .handle_payment_succeeded(&sub_id(), &record.invoice_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(recovered.status, DunningStatus::Recovered);
        assert_eq!(recovered.next_retry_at, None);
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Active);
        assert_eq!(sent(&f, NotificationKind::PaymentRecovered).await, 1);
    }

    #[tokio::test]
    async fn payment_succeeded_after_terminal_state_is_a_no_op() {
        let f = fixture();
        let record = open_cycle(&f).await;
        f.engine
            .handle_subscription_deleted(&sub_id())
            .await
            .unwrap();

        let result = f
            .engine
            .handle_payment_succeeded(&sub_id(), &record.invoice_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.status, DunningStatus::Canceled);
        assert_eq!(sent(&f, NotificationKind::PaymentRecovered).await, 0);
    }

    #[tokio::test]
    async fn payment_succeeded_outside_dunning_is_ignored() {
        let f = fixture();
        let result = f
            .engine
            .handle_payment_succeeded(&sub_id(), &invoice("inv_999"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn late_failure_after_payment_succeeded_is_a_no_op() {
        let f = fixture();
        store_subscription(&f, SubscriptionStatus::Active).await;

        let paid = f
            .engine
            .handle_payment_succeeded(&sub_id(), &invoice("inv_123"))
            .await
            .unwrap();
        assert!(paid.is_none());

        let record = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_123"), Some("card_declined".into()))
            .await
            .unwrap();

        assert_eq!(record.status, DunningStatus::Recovered);
        assert_eq!(record.attempt_count, 0);
        assert!(record.next_retry_at.is_none());
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Active);
        assert_eq!(sent(&f, NotificationKind::PaymentFailed).await, 0);
        assert!(f
            .store
            .find_active_for_subscription(&sub_id())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn subscription_deleted_cancels_open_cycles() {
        let f = fixture();
        let record = open_cycle(&f).await;

        let canceled = f
            .engine
            .handle_subscription_deleted(&sub_id())
            .await
            .unwrap();

        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id, record.id);
        assert_eq!(canceled[0].status, DunningStatus::Canceled);
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Canceled);
        assert_eq!(
            sent(&f, NotificationKind::SubscriptionCanceled).await,
            1
        );
    }

    #[tokio::test]
    async fn second_invoice_keeps_subscription_past_due_until_both_recover() {
        let f = fixture();
        let first = open_cycle(&f).await;
        let second = f
            .engine
            .handle_failed_payment(&sub_id(), &invoice("inv_456"), None)
            .await
            .unwrap();

        f.engine
            .handle_payment_succeeded(&sub_id(), &first.invoice_id)
            .await
            .unwrap();
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::PastDue);

        f.engine
            .handle_payment_succeeded(&sub_id(), &second.invoice_id)
            .await
            .unwrap();
        assert_eq!(subscription_status(&f).await, SubscriptionStatus::Active);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Concurrency
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn version_conflicts_are_retried() {
        let f = fixture();
        let record = open_cycle(&f).await;
        f.store.inject_conflicts(2);

        let recovered = f
            .engine
            .handle_payment_succeeded(&sub_id(), &record.invoice_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(recovered.status, DunningStatus::Recovered);
        assert_eq!(recovered.version, record.version + 1);
    }

    #[tokio::test]
    async fn persistent_conflicts_give_up() {
        let f = fixture_with(
            DunningPolicy::default(),
            EngineSettings {
                max_conflict_retries: 1,
                ..EngineSettings::default()
            },
        );
        let record = open_cycle(&f).await;
        f.store.inject_conflicts(5);

        let result = f
            .engine
            .handle_payment_succeeded(&sub_id(), &record.invoice_id)
            .await;

        assert!(matches!(result, Err(DunningError::PersistenceConflict(_))));
        let stored = f.engine.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DunningStatus::RetryScheduled);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Queries
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn status_falls_back_to_the_latest_closed_cycle() {
        let f = fixture();
        let record = open_cycle(&f).await;
        f.engine
            .handle_payment_succeeded(&sub_id(), &record.invoice_id)
            .await
            .unwrap();

        let status = f.engine.get_dunning_status(&sub_id()).await.unwrap().unwrap();

        assert_eq!(status.id, record.id);
        assert_eq!(status.status, DunningStatus::Recovered);
    }
}
