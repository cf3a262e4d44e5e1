//! Background services.

mod retry_scheduler;

pub use retry_scheduler::{RetryScheduler, RetrySchedulerConfig, SweepStats};
