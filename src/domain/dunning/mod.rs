//! Dunning module - recovery of failed subscription payments.
//!
//! # Module Structure
//!
//! - `status` - DunningStatus state machine
//! - `record` - DunningRecord aggregate
//! - `backoff` / `policy` - Retry timing and attempt budget
//! - `notification` - Notification kinds per transition
//! - `errors` - Dunning error taxonomy

mod backoff;
mod errors;
mod notification;
mod policy;
mod record;
mod status;

pub use backoff::BackoffPolicy;
pub use errors::DunningError;
pub use notification::NotificationKind;
pub use policy::DunningPolicy;
pub use record::{DeclineOutcome, DunningRecord};
pub use status::DunningStatus;
