//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `billing` - Local view of provider subscriptions
//! - `dunning` - Failed-payment recovery lifecycle
//! - `webhook` - Provider webhook verification and event parsing

pub mod billing;
pub mod dunning;
pub mod foundation;
pub mod webhook;
