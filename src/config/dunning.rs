//! Dunning policy and scheduler configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::scheduler::RetrySchedulerConfig;
use crate::application::EngineSettings;
use crate::domain::dunning::{BackoffPolicy, DunningPolicy};

/// Dunning configuration
///
/// Numbers here are tunable policy. Defaults give four charge attempts
/// spaced 3, 5 and 7 days apart.
#[derive(Debug, Clone, Deserialize)]
pub struct DunningConfig {
    /// Charge attempts before a cycle is exhausted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Comma-separated delays in days, e.g. "3,5,7"
    #[serde(default = "default_backoff_schedule")]
    pub backoff_schedule_days: String,

    /// Wait after a transient provider error, in seconds
    #[serde(default = "default_transient_cooldown")]
    pub transient_cooldown_secs: u64,

    /// Reload-and-recompute attempts after a version conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Seconds between scheduler sweeps
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    /// Concurrent charge workers
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Records taken from each queue per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Age after which a RETRYING claim is resumed
    #[serde(default = "default_stale_claim_after")]
    pub stale_claim_after_secs: u64,

    /// Age after which an undispatched webhook event is replayed
    #[serde(default = "default_replay_after")]
    pub replay_after_secs: u64,
}

impl DunningConfig {
    /// Parse the backoff schedule
    pub fn backoff(&self) -> Result<BackoffPolicy, ValidationError> {
        BackoffPolicy::parse_days(&self.backoff_schedule_days)
            .map_err(|e| {
                ValidationError::invalid("DUNNING__DUNNING__BACKOFF_SCHEDULE_DAYS", e.to_string())
            })
    }

    /// Build the dunning policy
    pub fn to_policy(&self) -> Result<DunningPolicy, ValidationError> {
        Ok(DunningPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff()?)
            .with_transient_cooldown(Duration::from_secs(self.transient_cooldown_secs)))
    }

    /// Engine settings, with the charge deadline taken from the payment section
    pub fn engine_settings(&self, charge_timeout: Duration) -> EngineSettings {
        EngineSettings {
            max_conflict_retries: self.max_conflict_retries,
            charge_timeout,
        }
    }

    /// Retry scheduler settings
    pub fn scheduler_config(&self) -> RetrySchedulerConfig {
        RetrySchedulerConfig::default()
            .with_interval(Duration::from_secs(self.scheduler_interval_secs))
            .with_concurrency(self.worker_concurrency)
            .with_batch_size(self.batch_size)
            .with_stale_claim_after(Duration::from_secs(self.stale_claim_after_secs))
            .with_replay_after(Duration::from_secs(self.replay_after_secs))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=20).contains(&self.max_attempts) {
            return Err(ValidationError::out_of_range(
                "DUNNING__DUNNING__MAX_ATTEMPTS",
                "between 1 and 20",
            ));
        }
        self.backoff()?;
        if self.scheduler_interval_secs == 0 {
            return Err(ValidationError::out_of_range(
                "DUNNING__DUNNING__SCHEDULER_INTERVAL_SECS",
                "at least 1",
            ));
        }
        if !(1..=100).contains(&self.worker_concurrency) {
            return Err(ValidationError::out_of_range(
                "DUNNING__DUNNING__WORKER_CONCURRENCY",
                "between 1 and 100",
            ));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::out_of_range(
                "DUNNING__DUNNING__BATCH_SIZE",
                "at least 1",
            ));
        }
        // A claim younger than the sweep interval would be resumed while its
        // worker is still charging.
        if self.stale_claim_after_secs <= self.scheduler_interval_secs {
            return Err(ValidationError::Inconsistent {
                first: "DUNNING__DUNNING__STALE_CLAIM_AFTER_SECS",
                second: "DUNNING__DUNNING__SCHEDULER_INTERVAL_SECS",
            });
        }
        Ok(())
    }
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_schedule_days: default_backoff_schedule(),
            transient_cooldown_secs: default_transient_cooldown(),
            max_conflict_retries: default_max_conflict_retries(),
            scheduler_interval_secs: default_scheduler_interval(),
            worker_concurrency: default_worker_concurrency(),
            batch_size: default_batch_size(),
            stale_claim_after_secs: default_stale_claim_after(),
            replay_after_secs: default_replay_after(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_schedule() -> String {
    "3,5,7".to_string()
}

fn default_transient_cooldown() -> u64 {
    300
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_scheduler_interval() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_batch_size() -> u32 {
    100
}

fn default_stale_claim_after() -> u64 {
    900
}

fn default_replay_after() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_default_policy() {
        let config = DunningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.to_policy().unwrap(), DunningPolicy::default());
    }

    #[test]
    fn test_scheduler_config_defaults() {
        let config = DunningConfig::default().scheduler_config();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.stale_claim_after, Duration::from_secs(900));
        assert_eq!(config.replay_after, Duration::from_secs(120));
    }

    #[test]
    fn test_engine_settings_take_charge_timeout() {
        let settings = DunningConfig::default().engine_settings(Duration::from_secs(7));
        assert_eq!(settings.max_conflict_retries, 5);
        assert_eq!(settings.charge_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_custom_schedule() {
        let config = DunningConfig {
            max_attempts: 3,
            backoff_schedule_days: "1, 2".to_string(),
            ..Default::default()
        };
        let policy = config.to_policy().unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay(1), Duration::from_secs(2 * 86_400));
    }

    #[test]
    fn test_validation_rejects_bad_schedule() {
        for schedule in ["", "3,x", "5,3", "0,1"] {
            let config = DunningConfig {
                backoff_schedule_days: schedule.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(ValidationError::Invalid {
                        field: "DUNNING__DUNNING__BACKOFF_SCHEDULE_DAYS",
                        ..
                    })
                ),
                "schedule {:?} should be rejected",
                schedule
            );
        }
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let config = DunningConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = DunningConfig {
            worker_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_claim_must_outlast_a_sweep() {
        let config = DunningConfig {
            scheduler_interval_secs: 60,
            stale_claim_after_secs: 60,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::Inconsistent {
                first: "DUNNING__DUNNING__STALE_CLAIM_AFTER_SECS",
                second: "DUNNING__DUNNING__SCHEDULER_INTERVAL_SECS",
            })
        );
    }
}
