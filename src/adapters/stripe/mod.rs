//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProviderClient` port for Stripe, including:
//! - Subscription retrieval (customer expanded for the notification address)
//! - Idempotent invoice payment
//! - Immediate subscription cancellation
//!
//! # Security
//!
//! - All secrets are handled via `secrecy::SecretString`
//! - Webhook signatures are verified in the webhook domain, not here
//!
//! # Configuration
//!
//! Required settings:
//! - `DUNNING__PAYMENT__STRIPE_API_KEY`: Stripe secret API key

mod api_types;
mod mock_payment_provider;
mod stripe_adapter;

pub use api_types::{StripeCustomer, StripeCustomerRef, StripeInvoice, StripeSubscription};
pub use mock_payment_provider::MockPaymentProvider;
pub use stripe_adapter::{StripeConfig, StripePaymentAdapter};
