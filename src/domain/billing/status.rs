//! Subscription status state machine.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Status of a billing relationship as seen by the dunning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up.
    Active,

    /// An invoice failed and a dunning cycle is recovering it.
    /// The user keeps access while retries are pending.
    PastDue,

    /// Ended at the provider. No access.
    Canceled,

    /// Billing suspended by the customer or operator.
    Paused,
}

impl SubscriptionStatus {
    /// Returns true if this status grants access to the product.
    pub fn has_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }

    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// Parses a name produced by [`SubscriptionStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From ACTIVE
            (Active, PastDue)
                | (Active, Paused)
                | (Active, Canceled)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, Canceled)
            // From PAUSED
                | (Paused, Active)
                | (Paused, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Active => vec![PastDue, Paused, Canceled],
            PastDue => vec![Active, Canceled],
            Paused => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}
