//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Provider Ports
//!
//! - `PaymentProviderClient` - Charge invoices, read and cancel subscriptions
//!
//! ## Persistence Ports
//!
//! - `DunningStore` - Version-checked dunning records plus the subscription mirror
//! - `PaymentEventLedger` - Inbound webhook idempotency and replay
//! - `NotificationLedger` - At most one message per (record, kind)
//!
//! ## Messaging Ports
//!
//! - `NotificationSender` - User-facing dunning messages

mod dunning_store;
mod notification_ledger;
mod notification_sender;
mod payment_event_ledger;
mod payment_provider;

pub use dunning_store::{CreateResult, DunningStore};
pub use notification_ledger::{NotificationLedger, NotificationRecord};
pub use notification_sender::{NotificationError, NotificationSender};
pub use payment_event_ledger::{PaymentEvent, PaymentEventLedger, PaymentEventStatus, SaveResult};
pub use payment_provider::{
    ChargeOutcome, FailureClass, PaymentError, PaymentErrorCode, PaymentProviderClient,
    ProviderSubscription,
};
