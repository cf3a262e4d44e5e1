//! Application layer - Services and handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.

pub mod handlers;

pub use handlers::{
    AcceptedEvent, DispatchOutcome, DunningEngine, EngineSettings, NotificationDispatcher,
    RetryOutcome, SubscriptionLifecycleManager, WebhookIngestionGateway,
};
