//! PostgreSQL adapters - Database implementations for the persistence ports.
//!
//! - `PostgresDunningStore` - dunning records and the subscription mirror
//! - `PostgresPaymentEventLedger` - inbound webhook idempotency ledger
//! - `PostgresNotificationLedger` - outbound notification ledger
//!
//! Schema lives in `migrations/`.

mod dunning_store;
mod notification_ledger;
mod payment_event_ledger;

pub use dunning_store::PostgresDunningStore;
pub use notification_ledger::PostgresNotificationLedger;
pub use payment_event_ledger::PostgresPaymentEventLedger;
