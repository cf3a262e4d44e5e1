//! Retry delay policy.

use std::time::Duration;

use crate::domain::foundation::ValidationError;

const SECS_PER_DAY: u64 = 86_400;

/// Delay between a failure and the next charge attempt.
///
/// `delay(n)` is the wait after `n` failed charge attempts; `delay(0)` is
/// the wait between the original failed payment and the first retry.
/// Every variant is monotonically non-decreasing in `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Explicit delays. Indices past the end reuse the last entry.
    Schedule(Vec<Duration>),

    /// `base * factor^n`, capped at `max`.
    Exponential {
        base: Duration,
        factor: u32,
        max: Duration,
    },
}

impl BackoffPolicy {
    /// Builds a schedule from whole days, e.g. `[3, 5, 7]`.
    ///
    /// # Errors
    ///
    /// Rejects an empty schedule, zero-day entries, and decreasing schedules.
    pub fn from_days(days: &[u64]) -> Result<Self, ValidationError> {
        if days.is_empty() {
            return Err(ValidationError::empty_field("backoff_schedule_days"));
        }
        if days.iter().any(|d| *d == 0) {
            return Err(ValidationError::invalid_format(
                "backoff_schedule_days",
                "delays must be at least one day",
            ));
        }
        if days.windows(2).any(|w| w[1] < w[0]) {
            return Err(ValidationError::invalid_format(
                "backoff_schedule_days",
                "delays must not decrease",
            ));
        }
        Ok(BackoffPolicy::Schedule(
            days.iter()
                .map(|d| Duration::from_secs(d.saturating_mul(SECS_PER_DAY)))
                .collect(),
        ))
    }

    /// Parses a comma-separated day list such as `"3,5,7"`.
    pub fn parse_days(list: &str) -> Result<Self, ValidationError> {
        let days = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>().map_err(|_| {
                    ValidationError::invalid_format(
                        "backoff_schedule_days",
                        format!("'{}' is not a whole number of days", s),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_days(&days)
    }

    /// Returns the wait after `failed_attempts` failures.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match self {
            BackoffPolicy::Schedule(delays) => {
                let index = (failed_attempts as usize).min(delays.len().saturating_sub(1));
                delays.get(index).copied().unwrap_or_default()
            }
            BackoffPolicy::Exponential { base, factor, max } => {
                let multiplier = factor.checked_pow(failed_attempts).unwrap_or(u32::MAX);
                base.checked_mul(multiplier)
                    .map_or(*max, |delay| delay.min(*max))
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Schedule(
            [3, 5, 7]
                .iter()
                .map(|d| Duration::from_secs(d * SECS_PER_DAY))
                .collect(),
        )
    }
}
