//! Webhook module - authenticating and parsing provider events.
//!
//! Inbound provider payloads are verified, then parsed into the closed
//! [`InboundEvent`] variant type before anything else sees them.

mod errors;
mod event;
mod verifier;

pub use errors::WebhookError;
pub use event::{EnvelopeData, InboundEvent, ProviderEventEnvelope};
pub use verifier::{compute_signature_hex, SignatureHeader, WebhookVerifier};
