//! SubscriptionLifecycleManager - the subscription half of every transition.
//!
//! The engine never writes subscription status itself. It asks this manager
//! which [`SubscriptionChange`] a record transition implies and hands that
//! change to the store, which commits it with the record.

use std::sync::Arc;

use crate::domain::billing::{SubscriptionChange, SubscriptionStatus};
use crate::domain::dunning::{DunningError, DunningStatus};
use crate::domain::foundation::SubscriptionId;
use crate::ports::{DunningStore, PaymentErrorCode, PaymentProviderClient};

/// Derives and applies subscription status changes.
pub struct SubscriptionLifecycleManager {
    store: Arc<dyn DunningStore>,
    provider: Arc<dyn PaymentProviderClient>,
}

impl SubscriptionLifecycleManager {
    pub fn new(store: Arc<dyn DunningStore>, provider: Arc<dyn PaymentProviderClient>) -> Self {
        Self { store, provider }
    }

    /// Subscription change implied by a record moving from `previous` to
    /// `next`. `previous` is `None` for a newly created record.
    ///
    /// Exhaustion implies no change: the subscription stays past due until
    /// the provider confirms the cancellation.
    pub fn change_for(
        previous: Option<DunningStatus>,
        next: DunningStatus,
    ) -> Option<SubscriptionChange> {
        match (previous, next) {
            (None, _) => Some(SubscriptionChange::EnterDunning),
            (Some(prev), next) if prev == next => None,
            (_, DunningStatus::Recovered) => Some(SubscriptionChange::LeaveDunning),
            (_, DunningStatus::Canceled) => Some(SubscriptionChange::Cancel),
            _ => None,
        }
    }

    /// Cancels at the provider, then commits CANCELED locally.
    ///
    /// A provider that no longer knows the subscription counts as canceled.
    /// On any other provider failure nothing local changes and the error is
    /// returned so the retry scheduler can try again.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<SubscriptionStatus>, DunningError> {
        match self.provider.cancel_subscription(subscription_id).await {
            Ok(()) => {}
            Err(e) if e.code == PaymentErrorCode::NotFound => {
                tracing::info!(
                    subscription_id = %subscription_id,
                    "Subscription already gone at provider"
                );
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Provider cancellation failed, subscription stays past due"
                );
                return Err(if e.is_transient() {
                    DunningError::TransientProviderError(e.to_string())
                } else {
                    DunningError::Infrastructure(e.to_string())
                });
            }
        }

        let status = self
            .store
            .apply_subscription_change(subscription_id, SubscriptionChange::Cancel)
            .await?;

        tracing::info!(subscription_id = %subscription_id, "Subscription canceled");
        Ok(status)
    }
}
