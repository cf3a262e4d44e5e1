//! RetryScheduler - Background service that drives dunning records forward.
//!
//! Webhooks are not the only trigger for a transition: retries fall due with
//! the passage of time. Each sweep works through four queues, in order:
//!
//! 1. Due retries (`RETRY_SCHEDULED`, `next_retry_at <= now`, oldest first)
//! 2. Stale claims (`RETRYING` records whose worker never finished)
//! 3. Pending cancellations (exhausted records the provider has not canceled)
//! 4. Webhook events whose dispatch never completed
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 60s | Time between sweeps |
//! | `concurrency` | 10 | Workers calling the provider at once |
//! | `batch_size` | 100 | Max records per queue per sweep |
//! | `stale_claim_after` | 15m | Age at which a RETRYING claim is resumed |
//! | `replay_after` | 2m | Age at which an undispatched event is replayed |
//! | `replay_max_attempts` | 10 | Dispatches before an event is left alone |
//!
//! ## Graceful Shutdown
//!
//! A sweep in progress runs to completion, including its in-flight workers.
//! No extra sweep is started after the shutdown signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time;

use crate::application::{DunningEngine, RetryOutcome, WebhookIngestionGateway};
use crate::domain::dunning::DunningError;
use crate::domain::foundation::Timestamp;
use crate::ports::{DunningStore, PaymentEventLedger};

/// Configuration for the RetryScheduler service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedulerConfig {
    /// Time between sweeps.
    pub interval: Duration,

    /// Maximum concurrent workers.
    pub concurrency: usize,

    /// Maximum records taken from each queue per sweep.
    pub batch_size: u32,

    /// A RETRYING record untouched for this long is considered abandoned.
    pub stale_claim_after: Duration,

    /// Undispatched webhook events older than this are replayed.
    pub replay_after: Duration,

    /// Events dispatched this many times are no longer replayed.
    pub replay_max_attempts: u32,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            concurrency: 10,
            batch_size: 100,
            stale_claim_after: Duration::from_secs(15 * 60),
            replay_after: Duration::from_secs(120),
            replay_max_attempts: 10,
        }
    }
}

impl RetrySchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }

    pub fn with_replay_after(mut self, after: Duration) -> Self {
        self.replay_after = after;
        self
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Charge attempts made (due retries and resumed claims).
    pub retried: usize,
    pub recovered: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// Attempts deferred by a transient provider error.
    pub transient: usize,
    /// Records another worker had already claimed or moved on.
    pub skipped: usize,
    /// Transitions abandoned after repeated version conflicts.
    pub conflicts: usize,
    /// Provider cancellations completed.
    pub cancellations: usize,
    /// Webhook events replayed successfully.
    pub replayed: usize,
    pub errors: usize,
}

impl SweepStats {
    /// True when the sweep touched nothing.
    pub fn is_idle(&self) -> bool {
        *self == SweepStats::default()
    }

    fn record_retry(&mut self, result: Result<RetryOutcome, DunningError>) {
        match result {
            Ok(RetryOutcome::Recovered(_)) => {
                self.retried += 1;
                self.recovered += 1;
            }
            Ok(RetryOutcome::Rescheduled(_)) => {
                self.retried += 1;
                self.rescheduled += 1;
            }
            Ok(RetryOutcome::Exhausted(_)) => {
                self.retried += 1;
                self.exhausted += 1;
            }
            Ok(RetryOutcome::Deferred(_)) => {
                self.retried += 1;
                self.transient += 1;
            }
            Ok(RetryOutcome::Skipped(_)) => self.skipped += 1,
            Err(DunningError::PersistenceConflict(_)) => self.conflicts += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Background service that sweeps due dunning work.
pub struct RetryScheduler {
    engine: Arc<DunningEngine>,
    gateway: Arc<WebhookIngestionGateway>,
    store: Arc<dyn DunningStore>,
    ledger: Arc<dyn PaymentEventLedger>,
    config: RetrySchedulerConfig,
    workers: Arc<Semaphore>,
}

impl RetryScheduler {
    pub fn new(
        engine: Arc<DunningEngine>,
        gateway: Arc<WebhookIngestionGateway>,
        store: Arc<dyn DunningStore>,
        ledger: Arc<dyn PaymentEventLedger>,
        config: RetrySchedulerConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            engine,
            gateway,
            store,
            ledger,
            config,
            workers,
        }
    }

    /// Run sweeps until the shutdown signal is received.
    ///
    /// A failed sweep is logged and the loop carries on with the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            concurrency = self.config.concurrency,
            "Retry scheduler started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Retry scheduler stopped");
                        return;
                    }
                }

                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats.is_idle() => {
                            tracing::debug!("Sweep found nothing to do");
                        }
                        Ok(stats) => {
                            tracing::info!(
                                retried = stats.retried,
                                recovered = stats.recovered,
                                rescheduled = stats.rescheduled,
                                exhausted = stats.exhausted,
                                transient = stats.transient,
                                skipped = stats.skipped,
                                conflicts = stats.conflicts,
                                cancellations = stats.cancellations,
                                replayed = stats.replayed,
                                errors = stats.errors,
                                "Sweep finished"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// Runs one full sweep.
    ///
    /// Also the entry point for tests that do not want the timer loop.
    ///
    /// # Errors
    ///
    /// Only failures to *list* work are returned. Failures of individual
    /// records are counted in the stats.
    pub async fn sweep(&self) -> Result<SweepStats, DunningError> {
        let mut stats = SweepStats::default();
        let batch = self.config.batch_size;
        let now = Timestamp::now();

        let due = self.store.find_due_retries(now, batch).await?;
        for result in self
            .fan_out(due, |engine, _, record| async move {
                engine.process_due_retry(&record.id).await
            })
            .await
        {
            stats.record_retry(result);
        }

        let claimed_before = now.minus_duration(self.config.stale_claim_after);
        let stale = self.store.find_stale_claims(claimed_before, batch).await?;
        for result in self
            .fan_out(stale, move |engine, _, record| async move {
                engine.resume_stale_claim(&record.id, claimed_before).await
            })
            .await
        {
            stats.record_retry(result);
        }

        let pending = self.store.find_pending_cancellations(batch).await?;
        for result in self
            .fan_out(pending, |engine, _, record| async move {
                engine.complete_cancellation(&record.id).await
            })
            .await
        {
            match result {
                Ok(true) => stats.cancellations += 1,
                Ok(false) => stats.transient += 1,
                Err(_) => stats.errors += 1,
            }
        }

        let received_before = now.minus_duration(self.config.replay_after);
        let undispatched = self
            .ledger
            .find_unprocessed(received_before, self.config.replay_max_attempts, batch)
            .await?;
        for result in self
            .fan_out(undispatched, |_, gateway, entry| async move {
                gateway.replay(&entry).await
            })
            .await
        {
            match result {
                Ok(()) => stats.replayed += 1,
                Err(_) => stats.errors += 1,
            }
        }

        Ok(stats)
    }

    /// Runs `work` for every item on the bounded worker pool and collects
    /// the results. Worker errors are logged where they happen; a panicked
    /// worker counts as an infrastructure error.
    async fn fan_out<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> Vec<Result<T, DunningError>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(Arc<DunningEngine>, Arc<WebhookIngestionGateway>, I) -> Fut,
        Fut: Future<Output = Result<T, DunningError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for item in items {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let job = work(self.engine.clone(), self.gateway.clone(), item);
            tasks.spawn(async move {
                let result = job.await;
                drop(permit);
                result
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "Scheduled dunning work failed");
                    }
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduled dunning worker panicked");
                    results.push(Err(DunningError::Infrastructure(e.to_string())));
                }
            }
        }
        results
    }
}
