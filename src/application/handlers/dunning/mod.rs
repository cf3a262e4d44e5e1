//! Dunning handlers.
//!
//! ## Services
//! - `DunningEngine` - state machine transitions, charges and queries
//! - `SubscriptionLifecycleManager` - subscription half of each transition
//! - `NotificationDispatcher` - ledger-gated user notifications
//! - `WebhookIngestionGateway` - verified, deduplicated provider events

mod engine;
mod ingest_webhook;
mod lifecycle;
mod notifications;

pub use engine::{DunningEngine, EngineSettings, RetryOutcome};
pub use ingest_webhook::{AcceptedEvent, WebhookIngestionGateway};
pub use lifecycle::SubscriptionLifecycleManager;
pub use notifications::{DispatchOutcome, NotificationDispatcher};
