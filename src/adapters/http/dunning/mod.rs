//! HTTP adapter for the dunning engine.
//!
//! - `POST /api/webhooks/payments` - Provider webhooks (signature verified)
//! - `POST /api/dunning/failed-payments` - Open a dunning cycle directly
//! - `GET /api/dunning/subscriptions/:subscription_id` - Current dunning state
//! - `POST /api/dunning/records/:id/retry` - Manual retry
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::DunningAppState;
pub use routes::dunning_router;
