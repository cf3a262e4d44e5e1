//! NotificationDispatcher - at most one message per (dunning record, kind).
//!
//! Delivery is best effort. Nothing returned from here can fail a
//! transition; the outcome is reported for logging and tests only.
//!
//! The engine hands messages to [`NotificationDispatcher::dispatch_in_background`]
//! so a slow sender never holds up a committed transition. Background sends
//! are tracked in a `JoinSet` and can be drained on shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::domain::dunning::{DunningRecord, NotificationKind};
use crate::domain::foundation::{DunningRecordId, Timestamp};
use crate::ports::{NotificationLedger, NotificationRecord, NotificationSender};

/// What happened to a notification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered and recorded in the ledger.
    Sent,
    /// The ledger already had this pair; nothing was sent.
    AlreadySent,
    /// Delivery or ledger access failed; logged and dropped.
    Failed(String),
}

/// Sends dunning notifications through the ledger.
///
/// Clones share the ledger, the sender and the set of background sends.
#[derive(Clone)]
pub struct NotificationDispatcher {
    ledger: Arc<dyn NotificationLedger>,
    sender: Arc<dyn NotificationSender>,
    send_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<(DunningRecordId, NotificationKind)>>>,
    background: Arc<Mutex<JoinSet<DispatchOutcome>>>,
}

impl NotificationDispatcher {
    pub fn new(
        ledger: Arc<dyn NotificationLedger>,
        sender: Arc<dyn NotificationSender>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            sender,
            send_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            background: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Starts `dispatch` on a background task and returns immediately.
    ///
    /// A pair that is already being sent is skipped, so two transitions
    /// emitting the same kind close together cannot both pass the ledger
    /// check.
    pub async fn dispatch_in_background(
        &self,
        record: DunningRecord,
        kind: NotificationKind,
        data: serde_json::Value,
    ) {
        let key = (record.id, kind);
        if !self.in_flight.lock().await.insert(key) {
            tracing::debug!(record_id = %record.id, kind = %kind, "Notification already in flight");
            return;
        }

        let dispatcher = self.clone();
        let mut background = self.background.lock().await;
        while let Some(finished) = background.try_join_next() {
            log_join_error(finished);
        }
        background.spawn(async move {
            let outcome = dispatcher.dispatch(&record, kind, data).await;
            dispatcher.in_flight.lock().await.remove(&key);
            outcome
        });
    }

    /// Waits for every background send started so far.
    pub async fn drain(&self) {
        let mut background = self.background.lock().await;
        while let Some(finished) = background.join_next().await {
            log_join_error(finished);
        }
    }

    /// Checks the ledger, sends, then records the pair.
    pub async fn dispatch(
        &self,
        record: &DunningRecord,
        kind: NotificationKind,
        data: serde_json::Value,
    ) -> DispatchOutcome {
        match self.ledger.contains(&record.id, kind).await {
            Ok(true) => {
                tracing::debug!(record_id = %record.id, kind = %kind, "Notification already sent");
                return DispatchOutcome::AlreadySent;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    kind = %kind,
                    error = %e,
                    "Notification ledger unavailable, skipping notification"
                );
                return DispatchOutcome::Failed(e.to_string());
            }
        }

        let send = self.sender.send_notification(&record.user_id, kind, &data);
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    record_id = %record.id,
                    user_id = %record.user_id,
                    kind = %kind,
                    error = %e,
                    "Notification delivery failed"
                );
                return DispatchOutcome::Failed(e.to_string());
            }
            Err(_) => {
                tracing::warn!(
                    record_id = %record.id,
                    kind = %kind,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
                return DispatchOutcome::Failed("timed out".to_string());
            }
        }

        let entry = NotificationRecord {
            dunning_record_id: record.id,
            kind,
            sent_at: Timestamp::now(),
        };
        if let Err(e) = self.ledger.record_sent(&entry).await {
            // Sent but unrecorded: a replayed transition could send it again.
            tracing::warn!(
                record_id = %record.id,
                kind = %kind,
                error = %e,
                "Failed to record sent notification"
            );
        }

        tracing::info!(record_id = %record.id, kind = %kind, "Notification sent");
        DispatchOutcome::Sent
    }
}

fn log_join_error(finished: Result<DispatchOutcome, tokio::task::JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "Notification task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryNotificationLedger, RecordingNotificationSender};
    use crate::domain::dunning::DunningPolicy;
    use crate::domain::foundation::{InvoiceId, SubscriptionId, UserId};
    use serde_json::json;

    fn record() -> DunningRecord {
        DunningRecord::start(
            UserId::new("user-1").unwrap(),
            SubscriptionId::new("sub_1").unwrap(),
            InvoiceId::new("inv_1").unwrap(),
            None,
            &DunningPolicy::default(),
            Timestamp::now(),
        )
    }

    fn dispatcher(
        sender: Arc<RecordingNotificationSender>,
    ) -> (NotificationDispatcher, Arc<InMemoryNotificationLedger>) {
        let ledger = Arc::new(InMemoryNotificationLedger::new());
        (
            NotificationDispatcher::new(ledger.clone(), sender, Duration::from_secs(1)),
            ledger,
        )
    }

    #[tokio::test]
    async fn sends_once_per_record_and_kind() {
        let sender = Arc::new(RecordingNotificationSender::new());
        let (dispatcher, _) = dispatcher(sender.clone());
        let record = record();

        let first = dispatcher
            .dispatch(&record, NotificationKind::PaymentFailed, json!({}))
            .await;
        let second = dispatcher
            .dispatch(&record, NotificationKind::PaymentFailed, json!({}))
            .await;

        assert_eq!(first, DispatchOutcome::Sent);
        assert_eq!(second, DispatchOutcome::AlreadySent);
        assert_eq!(sender.count(NotificationKind::PaymentFailed).await, 1);
    }

    #[tokio::test]
    async fn different_kinds_are_sent_independently() {
        let sender = Arc::new(RecordingNotificationSender::new());
        let (dispatcher, _) = dispatcher(sender.clone());
        let record = record();

        dispatcher
            .dispatch(&record, NotificationKind::PaymentFailed, json!({}))
            .await;
        dispatcher
            .dispatch(&record, NotificationKind::RetryScheduled, json!({}))
            .await;

        assert_eq!(sender.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_not_recorded() {
        let sender = Arc::new(RecordingNotificationSender::failing());
        let (dispatcher, ledger) = dispatcher(sender.clone());
        let record = record();

        let outcome = dispatcher
            .dispatch(&record, NotificationKind::PaymentFailed, json!({}))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert!(!ledger
            .contains(&record.id, NotificationKind::PaymentFailed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn background_dispatch_returns_before_a_slow_sender() {
        let sender = Arc::new(
            RecordingNotificationSender::new().with_delay(Duration::from_millis(200)),
        );
        let (dispatcher, _) = dispatcher(sender.clone());
        let record = record();

        let started = std::time::Instant::now();
        dispatcher
            .dispatch_in_background(record.clone(), NotificationKind::PaymentFailed, json!({}))
            .await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(sender.count(NotificationKind::PaymentFailed).await, 0);

        dispatcher.drain().await;
        assert_eq!(sender.count(NotificationKind::PaymentFailed).await, 1);
    }

    #[tokio::test]
    async fn overlapping_background_sends_deliver_once() {
        let sender = Arc::new(
            RecordingNotificationSender::new().with_delay(Duration::from_millis(50)),
        );
        let (dispatcher, _) = dispatcher(sender.clone());
        let record = record();

        for _ in 0..3 {
            dispatcher
                .dispatch_in_background(record.clone(), NotificationKind::RetryScheduled, json!({}))
                .await;
        }
        dispatcher.drain().await;

        assert_eq!(sender.count(NotificationKind::RetryScheduled).await, 1);
    }
}
