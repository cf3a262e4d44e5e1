//! HTTP adapters - REST API implementations.

pub mod dunning;

pub use dunning::{dunning_router, DunningAppState};
