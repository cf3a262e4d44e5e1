//! DunningRecord aggregate.
//!
//! A dunning record is one recovery cycle for one failed invoice. It is
//! created on the first failed payment for a (subscription, invoice) pair,
//! only ever moves forward through [`DunningStatus`], and is never deleted.
//!
//! # Invariants
//!
//! - `next_retry_at` is set if and only if `status == RetryScheduled`
//! - `attempt_count` only grows on a declined charge and never exceeds the
//!   policy's `max_attempts`
//! - `version` is bumped by the writer on every committed change

use serde::{Deserialize, Serialize};

use super::{DunningPolicy, DunningStatus};
use crate::domain::foundation::{
    DomainError, DunningRecordId, ErrorCode, InvoiceId, StateMachine, SubscriptionId, Timestamp,
    UserId,
};

/// Result of applying a declined charge to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineOutcome {
    /// Another attempt was scheduled.
    Rescheduled,
    /// The attempt budget is spent.
    Exhausted,
}

/// One recovery cycle for a failed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningRecord {
    pub id: DunningRecordId,

    /// User notified about this cycle.
    pub user_id: UserId,

    pub subscription_id: SubscriptionId,

    pub invoice_id: InvoiceId,

    pub status: DunningStatus,

    /// Declined charge attempts so far.
    pub attempt_count: u32,

    /// When the scheduler should next charge. Only set while scheduled.
    pub next_retry_at: Option<Timestamp>,

    /// Most recent failure reason, for operators.
    pub last_error: Option<String>,

    /// Exhausted but the provider has not yet confirmed cancellation.
    pub cancellation_pending: bool,

    /// Optimistic concurrency counter.
    pub version: u64,

    pub created_at: Timestamp,

    pub updated_at: Timestamp,
}

impl DunningRecord {
    /// Starts a cycle for a failed payment and schedules the first retry.
    ///
    /// The record passes through `Started` and is returned `RetryScheduled`
    /// with `attempt_count = 0` and `next_retry_at = now + backoff(0)`.
    pub fn start(
        user_id: UserId,
        subscription_id: SubscriptionId,
        invoice_id: InvoiceId,
        reason: Option<String>,
        policy: &DunningPolicy,
        now: Timestamp,
    ) -> Self {
        let mut record = Self {
            id: DunningRecordId::new(),
            user_id,
            subscription_id,
            invoice_id,
            status: DunningStatus::Started,
            attempt_count: 0,
            next_retry_at: None,
            last_error: reason,
            cancellation_pending: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        // Started -> RetryScheduled is always valid.
        record.status = DunningStatus::RetryScheduled;
        record.next_retry_at = Some(now.plus_duration(policy.backoff.delay(0)));
        record
    }

    /// Closed record for an invoice paid before any failure was seen.
    ///
    /// It holds the (subscription, invoice) key so a failure delivered late
    /// finds a terminal record and opens nothing.
    pub fn settled(
        user_id: UserId,
        subscription_id: SubscriptionId,
        invoice_id: InvoiceId,
        now: Timestamp,
    ) -> Self {
        Self {
            id: DunningRecordId::new(),
            user_id,
            subscription_id,
            invoice_id,
            status: DunningStatus::Recovered,
            attempt_count: 0,
            next_retry_at: None,
            last_error: None,
            cancellation_pending: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the record can still transition.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// True when scheduled and `next_retry_at <= now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == DunningStatus::RetryScheduled
            && self.next_retry_at.map_or(false, |at| !at.is_after(&now))
    }

    /// Key sent with every charge so a duplicated call cannot double-charge.
    ///
    /// Stable across transient failures because `attempt_count` only moves
    /// on a declined charge.
    pub fn provider_idempotency_key(&self) -> String {
        format!("dunning_{}_attempt_{}", self.id, self.attempt_count)
    }

    /// Claims the record for a charge attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the record is `RetryScheduled`.
    pub fn claim(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(DunningStatus::Retrying, now)?;
        self.next_retry_at = None;
        Ok(())
    }

    /// Hands a claim back after a transient error without consuming an attempt.
    pub fn release_after_transient_error(
        &mut self,
        error: impl Into<String>,
        retry_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.require_status(DunningStatus::Retrying, "release")?;
        self.transition_to(DunningStatus::RetryScheduled, now)?;
        self.next_retry_at = Some(retry_at);
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Applies a declined charge, consuming one attempt.
    pub fn record_declined_charge(
        &mut self,
        error: impl Into<String>,
        policy: &DunningPolicy,
        now: Timestamp,
    ) -> Result<DeclineOutcome, DomainError> {
        self.require_status(DunningStatus::Retrying, "record a declined charge")?;
        self.last_error = Some(error.into());

        if self.attempt_count + 1 < policy.max_attempts {
            self.transition_to(DunningStatus::RetryScheduled, now)?;
            self.attempt_count += 1;
            self.next_retry_at = Some(now.plus_duration(policy.backoff.delay(self.attempt_count)));
            Ok(DeclineOutcome::Rescheduled)
        } else {
            self.transition_to(DunningStatus::Exhausted, now)?;
            self.attempt_count = policy.max_attempts.max(self.attempt_count);
            self.next_retry_at = None;
            self.cancellation_pending = true;
            Ok(DeclineOutcome::Exhausted)
        }
    }

    /// Marks the invoice paid, from a charge or an out-of-band success.
    pub fn recover(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(DunningStatus::Recovered, now)?;
        self.next_retry_at = None;
        self.last_error = None;
        Ok(())
    }

    /// Ends the cycle because the subscription was deleted.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(DunningStatus::Canceled, now)?;
        self.next_retry_at = None;
        Ok(())
    }

    /// Clears the pending-cancellation flag once the provider confirmed it.
    pub fn complete_cancellation(&mut self, now: Timestamp) {
        self.cancellation_pending = false;
        self.updated_at = now;
    }

    fn require_status(&self, expected: DunningStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot {} while {}", action, self.status.as_str()),
            )
            .with_detail("record_id", self.id.to_string()));
        }
        Ok(())
    }

    fn transition_to(&mut self, target: DunningStatus, now: Timestamp) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|e| {
            DomainError::new(ErrorCode::InvalidStateTransition, e.to_string())
                .with_detail("record_id", self.id.to_string())
        })?;
        self.updated_at = now;
        Ok(())
    }
}
