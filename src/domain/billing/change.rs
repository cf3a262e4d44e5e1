//! Subscription-status half of a dunning transition.

use super::SubscriptionStatus;

/// How a committed dunning transition moves its subscription.
///
/// Resolved by the store inside the same atomic unit as the record write, so
/// the check for other open cycles sees a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// A dunning cycle opened.
    EnterDunning,
    /// A dunning cycle closed with the invoice paid.
    LeaveDunning,
    /// The subscription ended.
    Cancel,
}

impl SubscriptionChange {
    /// Target status given the current one and whether any *other*
    /// non-terminal dunning record exists for the subscription.
    ///
    /// A canceled subscription stays canceled. Leaving dunning only
    /// reactivates a past-due subscription with no other open cycle.
    pub fn resolve(
        &self,
        current: SubscriptionStatus,
        other_active_cycles: bool,
    ) -> SubscriptionStatus {
        use SubscriptionStatus::*;
        match (self, current) {
            (_, Canceled) => Canceled,
            (SubscriptionChange::Cancel, _) => Canceled,
            (SubscriptionChange::EnterDunning, Active) => PastDue,
            (SubscriptionChange::EnterDunning, other) => other,
            (SubscriptionChange::LeaveDunning, PastDue) if !other_active_cycles => Active,
            (SubscriptionChange::LeaveDunning, other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    #[test]
    fn entering_dunning_marks_active_subscription_past_due() {
        assert_eq!(SubscriptionChange::EnterDunning.resolve(Active, false), PastDue);
        assert_eq!(SubscriptionChange::EnterDunning.resolve(PastDue, true), PastDue);
    }

    #[test]
    fn leaving_dunning_reactivates_only_when_no_other_cycle_is_open() {
        assert_eq!(SubscriptionChange::LeaveDunning.resolve(PastDue, false), Active);
        assert_eq!(SubscriptionChange::LeaveDunning.resolve(PastDue, true), PastDue);
    }

    #[test]
    fn canceled_is_sticky() {
        for change in [
            SubscriptionChange::EnterDunning,
            SubscriptionChange::LeaveDunning,
            SubscriptionChange::Cancel,
        ] {
            assert_eq!(change.resolve(Canceled, false), Canceled);
        }
    }

    #[test]
    fn cancel_ends_any_status() {
        for status in [Active, PastDue, Paused] {
            assert_eq!(SubscriptionChange::Cancel.resolve(status, true), Canceled);
        }
    }

    #[test]
    fn paused_subscription_is_left_alone_by_dunning() {
        assert_eq!(SubscriptionChange::EnterDunning.resolve(Paused, false), Paused);
        assert_eq!(SubscriptionChange::LeaveDunning.resolve(Paused, false), Paused);
    }
}
