//! Mock payment provider for testing.
//!
//! Provides a scriptable implementation of `PaymentProviderClient` for unit
//! and integration tests. Supports:
//! - Pre-configured subscriptions
//! - Scripted charge results, in order, with a fallback
//! - Idempotency-key replay like the real provider
//! - Call tracking

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::foundation::{InvoiceId, SubscriptionId};
use crate::ports::{ChargeOutcome, PaymentError, PaymentProviderClient, ProviderSubscription};

type ChargeResult = Result<ChargeOutcome, PaymentError>;

/// Mock payment provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.add_subscription(provider_subscription);
/// mock.push_charge_result(Err(PaymentError::card_declined("declined")));
/// ```
#[derive(Default, Clone)]
pub struct MockPaymentProvider {
    /// Inner state (thread-safe for async tests).
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<SubscriptionId, ProviderSubscription>,

    /// Results for the next charges, consumed front to back.
    scripted_charges: VecDeque<ChargeResult>,

    /// Result once the script is empty. `None` means paid.
    default_charge: Option<ChargeResult>,

    /// Results already returned per idempotency key.
    charges_by_key: HashMap<String, ChargeResult>,

    cancel_error: Option<PaymentError>,

    charge_delay: Option<Duration>,

    charge_calls: Vec<(InvoiceId, String)>,

    cancel_calls: Vec<SubscriptionId>,
}

impl MockPaymentProvider {
    /// Create a new mock provider where every charge succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Make a subscription retrievable.
    pub fn add_subscription(&self, subscription: ProviderSubscription) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Queue the result of the next charge with a new idempotency key.
    pub fn push_charge_result(&self, result: ChargeResult) {
        self.state().scripted_charges.push_back(result);
    }

    /// Result for charges once the queue is empty.
    pub fn set_default_charge_result(&self, result: ChargeResult) {
        self.state().default_charge = Some(result);
    }

    /// Make every cancellation fail with `error`.
    pub fn fail_cancellations_with(&self, error: PaymentError) {
        self.state().cancel_error = Some(error);
    }

    /// Let cancellations succeed again.
    pub fn allow_cancellations(&self) {
        self.state().cancel_error = None;
    }

    /// Delay every charge call, to exercise timeouts.
    pub fn set_charge_delay(&self, delay: Duration) {
        self.state().charge_delay = Some(delay);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertions
    // ════════════════════════════════════════════════════════════════════════════

    /// Every charge call as (invoice, idempotency key).
    pub fn charge_calls(&self) -> Vec<(InvoiceId, String)> {
        self.state().charge_calls.clone()
    }

    /// Every cancellation call.
    pub fn cancel_calls(&self) -> Vec<SubscriptionId> {
        self.state().cancel_calls.clone()
    }
}

#[async_trait]
impl PaymentProviderClient for MockPaymentProvider {
    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        Ok(self.state().subscriptions.get(subscription_id).cloned())
    }

    async fn charge_invoice(
        &self,
        invoice_id: &InvoiceId,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        let delay = {
            let mut state = self.state();
            state
                .charge_calls
                .push((invoice_id.clone(), idempotency_key.to_string()));
            state.charge_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(previous) = state.charges_by_key.get(idempotency_key) {
            return match previous {
                Ok(_) => Ok(ChargeOutcome::AlreadyPaid),
                Err(e) => Err(e.clone()),
            };
        }

        let result = match state.scripted_charges.pop_front() {
            Some(result) => result,
            None => state
                .default_charge
                .clone()
                .unwrap_or(Ok(ChargeOutcome::Paid)),
        };
        // The provider does not store results of requests it never processed.
        let processed = !matches!(&result, Err(e) if e.is_transient());
        if processed {
            state
                .charges_by_key
                .insert(idempotency_key.to_string(), result.clone());
        }
        result
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<(), PaymentError> {
        let mut state = self.state();
        state.cancel_calls.push(subscription_id.clone());
        match &state.cancel_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
