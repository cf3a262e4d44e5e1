//! Dunning status state machine.
//!
//! One dunning record walks this table per failed invoice:
//!
//! ```text
//! Started ──> RetryScheduled <──> Retrying ──> Exhausted
//!    │              │                 │
//!    └──────────────┴────────┬────────┘
//!                            ├──> Recovered
//!                            └──> Canceled
//! ```

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a dunning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningStatus {
    /// Created from a failed payment; immediately scheduled.
    Started,

    /// Waiting for `next_retry_at`.
    RetryScheduled,

    /// Claimed by a worker; a charge attempt is in flight.
    Retrying,

    /// The invoice was paid.
    Recovered,

    /// Every attempt failed; the subscription is being canceled.
    Exhausted,

    /// The subscription ended before recovery.
    Canceled,
}

impl DunningStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [DunningStatus; 6] = [
        DunningStatus::Started,
        DunningStatus::RetryScheduled,
        DunningStatus::Retrying,
        DunningStatus::Recovered,
        DunningStatus::Exhausted,
        DunningStatus::Canceled,
    ];

    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DunningStatus::Started => "started",
            DunningStatus::RetryScheduled => "retry_scheduled",
            DunningStatus::Retrying => "retrying",
            DunningStatus::Recovered => "recovered",
            DunningStatus::Exhausted => "exhausted",
            DunningStatus::Canceled => "canceled",
        }
    }

    /// Parses the storage name produced by [`DunningStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// True while the record still holds the subscription in PAST_DUE.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl StateMachine for DunningStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use DunningStatus::*;
        matches!(
            (self, target),
            (Started, RetryScheduled)
                | (Started, Recovered)
                | (Started, Canceled)
                | (RetryScheduled, Retrying)
                | (RetryScheduled, Recovered)
                | (RetryScheduled, Canceled)
                // A transient provider error hands the claim back
                | (Retrying, RetryScheduled)
                | (Retrying, Exhausted)
                | (Retrying, Recovered)
                | (Retrying, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DunningStatus::*;
        match self {
            Started => vec![RetryScheduled, Recovered, Canceled],
            RetryScheduled => vec![Retrying, Recovered, Canceled],
            Retrying => vec![RetryScheduled, Exhausted, Recovered, Canceled],
            Recovered | Exhausted | Canceled => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DunningStatus::*;

    #[test]
    fn started_moves_to_retry_scheduled() {
        assert_eq!(Started.transition_to(RetryScheduled), Ok(RetryScheduled));
    }

    #[test]
    fn retry_scheduled_can_only_be_claimed_not_exhausted() {
        assert!(RetryScheduled.can_transition_to(&Retrying));
        assert!(!RetryScheduled.can_transition_to(&Exhausted));
    }

    #[test]
    fn exhaustion_requires_an_attempt_in_flight() {
        assert!(Retrying.can_transition_to(&Exhausted));
        assert!(!Started.can_transition_to(&Exhausted));
    }

    #[test]
    fn out_of_band_success_and_deletion_apply_to_every_active_status() {
        for status in [Started, RetryScheduled, Retrying] {
            assert!(status.can_transition_to(&Recovered), "{:?}", status);
            assert!(status.can_transition_to(&Canceled), "{:?}", status);
        }
    }

    #[test]
    fn terminal_statuses_reject_everything() {
        for terminal in [Recovered, Exhausted, Canceled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.is_active());
            for target in DunningStatus::ALL {
                assert!(terminal.transition_to(target).is_err());
            }
        }
    }

    #[test]
    fn can_transition_to_matches_valid_transitions() {
        for from in DunningStatus::ALL {
            for to in DunningStatus::ALL {
                assert_eq!(
                    from.can_transition_to(&to),
                    from.valid_transitions().contains(&to),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn storage_names_round_trip() {
        for status in DunningStatus::ALL {
            assert_eq!(DunningStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DunningStatus::parse("pending"), None);
    }

    #[test]
    fn serde_uses_storage_names() {
        let json = serde_json::to_string(&RetryScheduled).unwrap();
        assert_eq!(json, "\"retry_scheduled\"");
    }
}
