//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `postgres` - Durable stores and ledgers
//! - `stripe` - Payment provider client (plus a scripted mock)
//! - `email` - Resend notification sender
//! - `memory` - In-memory stores for tests and local development
//! - `scheduler` - Background retry sweeps
//! - `http` - Axum routes for webhooks and operators

pub mod email;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod scheduler;
pub mod stripe;

pub use scheduler::{RetryScheduler, RetrySchedulerConfig, SweepStats};
