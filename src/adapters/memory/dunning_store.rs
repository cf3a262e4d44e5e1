//! In-memory DunningStore for tests and local development.
//!
//! One `RwLock` guards records and subscriptions together, so every method
//! is trivially atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::{Subscription, SubscriptionChange, SubscriptionStatus};
use crate::domain::dunning::{DunningRecord, DunningStatus};
use crate::domain::foundation::{
    DomainError, DunningRecordId, ErrorCode, InvoiceId, SubscriptionId, Timestamp,
};
use crate::ports::{CreateResult, DunningStore};

#[derive(Default)]
struct State {
    records: HashMap<DunningRecordId, DunningRecord>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl State {
    fn has_other_active(&self, subscription_id: &SubscriptionId, except: &DunningRecordId) -> bool {
        self.records
            .values()
            .any(|r| &r.subscription_id == subscription_id && &r.id != except && r.is_active())
    }

    fn apply_change(
        &mut self,
        subscription_id: &SubscriptionId,
        change: SubscriptionChange,
        except: Option<&DunningRecordId>,
    ) -> Option<SubscriptionStatus> {
        let others = match except {
            Some(id) => self.has_other_active(subscription_id, id),
            None => self
                .records
                .values()
                .any(|r| &r.subscription_id == subscription_id && r.is_active()),
        };
        let subscription = self.subscriptions.get_mut(subscription_id)?;
        let target = change.resolve(subscription.status, others);
        if target != subscription.status {
            subscription.status = target;
            subscription.updated_at = Timestamp::now();
        }
        Some(subscription.status)
    }

    fn check_version(&self, record: &DunningRecord, expected: u64) -> Result<(), DomainError> {
        let stored = self.records.get(&record.id).ok_or_else(|| {
            DomainError::new(ErrorCode::DunningRecordNotFound, "Dunning record not found")
                .with_detail("record_id", record.id.to_string())
        })?;
        if stored.version != expected {
            return Err(DomainError::conflict(format!(
                "expected version {}, found {}",
                expected, stored.version
            ))
            .with_detail("record_id", record.id.to_string()));
        }
        Ok(())
    }
}

/// In-memory dunning store.
#[derive(Default)]
pub struct InMemoryDunningStore {
    state: RwLock<State>,
    injected_conflicts: AtomicU32,
}

impl InMemoryDunningStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Makes the next `n` version-checked writes fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Overwrites a record without any checks.
    pub async fn put_record(&self, record: DunningRecord) {
        self.state.write().await.records.insert(record.id, record);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DunningStore for InMemoryDunningStore {
    async fn create_dunning_record(
        &self,
        record: &DunningRecord,
        change: Option<SubscriptionChange>,
    ) -> Result<CreateResult, DomainError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.records.values().find(|r| {
            r.subscription_id == record.subscription_id && r.invoice_id == record.invoice_id
        }) {
            return Ok(CreateResult::AlreadyExists(existing.clone()));
        }

        if change.is_some() && !state.subscriptions.contains_key(&record.subscription_id) {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("subscription {} is not stored", record.subscription_id),
            ));
        }

        state.records.insert(record.id, record.clone());
        if let Some(change) = change {
            state.apply_change(&record.subscription_id, change, Some(&record.id));
        }
        Ok(CreateResult::Created)
    }

    async fn update_dunning_record_if_version(
        &self,
        record: &DunningRecord,
        expected_version: u64,
    ) -> Result<(), DomainError> {
        if self.take_injected_conflict() {
            return Err(DomainError::conflict("injected conflict"));
        }
        let mut state = self.state.write().await;
        state.check_version(record, expected_version)?;
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn transactional_update_subscription_and_dunning(
        &self,
        record: &DunningRecord,
        expected_version: u64,
        change: Option<SubscriptionChange>,
    ) -> Result<Option<SubscriptionStatus>, DomainError> {
        if self.take_injected_conflict() {
            return Err(DomainError::conflict("injected conflict"));
        }
        let mut state = self.state.write().await;
        state.check_version(record, expected_version)?;
        state.records.insert(record.id, record.clone());
        Ok(change.and_then(|change| {
            state.apply_change(&record.subscription_id, change, Some(&record.id))
        }))
    }

    async fn find_dunning_record(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .find(|r| &r.subscription_id == subscription_id && &r.invoice_id == invoice_id)
            .cloned())
    }

    async fn find_dunning_record_by_id(
        &self,
        id: &DunningRecordId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        Ok(self.state.read().await.records.get(id).cloned())
    }

    async fn find_active_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| &r.subscription_id == subscription_id && r.is_active())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_latest_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| &r.subscription_id == subscription_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_due_retries(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .records
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_retry_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find_stale_claims(
        &self,
        claimed_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        let mut stale: Vec<_> = state
            .records
            .values()
            .filter(|r| r.status == DunningStatus::Retrying && r.updated_at.is_before(&claimed_before))
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn find_pending_cancellations(
        &self,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .records
            .values()
            .filter(|r| r.status == DunningStatus::Exhausted && r.cancellation_pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.updated_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.read().await.subscriptions.get(id).cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&subscription.id) {
            Some(existing) => {
                let status = existing.status;
                *existing = subscription.clone();
                existing.status = status;
            }
            None => {
                state
                    .subscriptions
                    .insert(subscription.id.clone(), subscription.clone());
            }
        }
        Ok(())
    }

    async fn apply_subscription_change(
        &self,
        id: &SubscriptionId,
        change: SubscriptionChange,
    ) -> Result<Option<SubscriptionStatus>, DomainError> {
        Ok(self.state.write().await.apply_change(id, change, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dunning::DunningPolicy;
    use crate::domain::foundation::{CustomerId, UserId};

    fn subscription(id: &str) -> Subscription {
        Subscription::new(
            SubscriptionId::new(id).unwrap(),
            CustomerId::new("cus_1").unwrap(),
            UserId::new("user-1").unwrap(),
        )
    }

    fn record(sub: &str, inv: &str) -> DunningRecord {
        DunningRecord::start(
            UserId::new("user-1").unwrap(),
            SubscriptionId::new(sub).unwrap(),
            InvoiceId::new(inv).unwrap(),
            None,
            &DunningPolicy::default(),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn create_enters_dunning_and_rejects_duplicates() {
        let store = InMemoryDunningStore::new();
        store.upsert_subscription(&subscription("sub_1")).await.unwrap();

        let first = record("sub_1", "inv_1");
        let second = record("sub_1", "inv_1");

        assert_eq!(
            store
                .create_dunning_record(&first, Some(SubscriptionChange::EnterDunning))
                .await
                .unwrap(),
            CreateResult::Created
        );
        assert_eq!(
            store
                .create_dunning_record(&second, Some(SubscriptionChange::EnterDunning))
                .await
                .unwrap(),
            CreateResult::AlreadyExists(first.clone())
        );

        let sub = store
            .get_subscription(&first.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_as_conflict() {
        let store = InMemoryDunningStore::new();
        let mut rec = record("sub_1", "inv_1");
        store.create_dunning_record(&rec, None).await.unwrap();

        rec.version = 1;
        store.update_dunning_record_if_version(&rec, 0).await.unwrap();

        rec.version = 2;
        let err = store
            .update_dunning_record_if_version(&rec, 0)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn leaving_dunning_waits_for_other_open_cycles() {
        let store = InMemoryDunningStore::new();
        store.upsert_subscription(&subscription("sub_1")).await.unwrap();
        let mut first = record("sub_1", "inv_1");
        let second = record("sub_1", "inv_2");
        for r in [&first, &second] {
            store
                .create_dunning_record(r, Some(SubscriptionChange::EnterDunning))
                .await
                .unwrap();
        }

        first.recover(Timestamp::now()).unwrap();
        first.version = 1;
        let status = store
            .transactional_update_subscription_and_dunning(
                &first,
                0,
                Some(SubscriptionChange::LeaveDunning),
            )
            .await
            .unwrap();

        assert_eq!(status, Some(SubscriptionStatus::PastDue));
    }

    #[tokio::test]
    async fn due_retries_are_ordered_and_limited() {
        let store = InMemoryDunningStore::new();
        let now = Timestamp::now();
        let mut late = record("sub_1", "inv_1");
        late.next_retry_at = Some(now.minus_duration(std::time::Duration::from_secs(60)));
        let mut early = record("sub_2", "inv_2");
        early.next_retry_at = Some(now.minus_duration(std::time::Duration::from_secs(3600)));
        let future = record("sub_3", "inv_3");
        for r in [&late, &early, &future] {
            store.create_dunning_record(r, None).await.unwrap();
        }

        let due = store.find_due_retries(now, 10).await.unwrap();
        assert_eq!(due.iter().map(|r| r.id).collect::<Vec<_>>(), vec![early.id, late.id]);

        let limited = store.find_due_retries(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_local_status() {
        let store = InMemoryDunningStore::new();
        store.upsert_subscription(&subscription("sub_1")).await.unwrap();
        store
            .apply_subscription_change(
                &SubscriptionId::new("sub_1").unwrap(),
                SubscriptionChange::Cancel,
            )
            .await
            .unwrap();

        store
            .upsert_subscription(&subscription("sub_1").with_email("a@example.com"))
            .await
            .unwrap();

        let sub = store
            .get_subscription(&SubscriptionId::new("sub_1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(sub.customer_email.as_deref(), Some("a@example.com"));
    }
}
