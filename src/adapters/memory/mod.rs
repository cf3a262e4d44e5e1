//! In-memory adapters for tests and local development.
//!
//! Backed by `tokio::sync` locks; state is lost on restart.

mod dunning_store;
mod notification_ledger;
mod notification_sender;
mod payment_event_ledger;

pub use dunning_store::InMemoryDunningStore;
pub use notification_ledger::InMemoryNotificationLedger;
pub use notification_sender::{RecordingNotificationSender, SentNotification};
pub use payment_event_ledger::InMemoryPaymentEventLedger;
