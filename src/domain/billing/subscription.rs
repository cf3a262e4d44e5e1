//! Subscription entity.

use serde::{Deserialize, Serialize};

use super::SubscriptionStatus;
use crate::domain::foundation::{
    CustomerId, DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, UserId,
};

/// A billing relationship between a customer and the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    /// Where dunning notifications are delivered, when known.
    pub customer_email: Option<String>,
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates an active subscription.
    pub fn new(id: SubscriptionId, customer_id: CustomerId, user_id: UserId) -> Self {
        Self {
            id,
            customer_id,
            customer_email: None,
            user_id,
            status: SubscriptionStatus::Active,
            current_period_end: None,
            cancel_at_period_end: false,
            updated_at: Timestamp::now(),
        }
    }

    /// Sets the notification address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Sets the status without validation (provider snapshots, fixtures).
    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    /// Moves to `target`, treating a move to the current status as a no-op.
    ///
    /// Returns whether the status changed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when the table forbids the move.
    pub fn transition_to(&mut self, target: SubscriptionStatus) -> Result<bool, DomainError> {
        if self.status == target {
            return Ok(false);
        }
        self.status = self.status.transition_to(target).map_err(|e| {
            DomainError::new(ErrorCode::InvalidStateTransition, e.to_string())
                .with_detail("subscription_id", self.id.as_str())
        })?;
        self.updated_at = Timestamp::now();
        Ok(true)
    }
}
