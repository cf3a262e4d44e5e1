//! Billing module - the local view of provider subscriptions.
//!
//! The dunning engine never writes subscription status directly; every change
//! is derived by the subscription lifecycle manager and committed together
//! with the dunning record it belongs to.

mod change;
mod status;
mod subscription;

pub use change::SubscriptionChange;
pub use status::SubscriptionStatus;
pub use subscription::Subscription;
