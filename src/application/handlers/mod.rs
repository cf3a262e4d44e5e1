//! Application handlers.
//!
//! Services that orchestrate domain operations over the ports.

pub mod dunning;

pub use dunning::{
    AcceptedEvent, DispatchOutcome, DunningEngine, EngineSettings, NotificationDispatcher,
    RetryOutcome, SubscriptionLifecycleManager, WebhookIngestionGateway,
};
