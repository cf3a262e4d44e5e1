//! Tunable dunning policy.

use std::time::Duration;

use super::BackoffPolicy;

/// Numeric policy for one dunning cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DunningPolicy {
    /// Charge attempts before the cycle is exhausted.
    pub max_attempts: u32,

    /// Delay between failures and the next attempt.
    pub backoff: BackoffPolicy,

    /// Wait before re-attempting after a transient provider error.
    pub transient_cooldown: Duration,
}

impl Default for DunningPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: BackoffPolicy::default(),
            transient_cooldown: Duration::from_secs(300),
        }
    }
}

impl DunningPolicy {
    /// Sets the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the transient-error cool-down.
    pub fn with_transient_cooldown(mut self, cooldown: Duration) -> Self {
        self.transient_cooldown = cooldown;
        self
    }
}
