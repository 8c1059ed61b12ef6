// In memory implementation of the OutboxStore port.
//
// Purpose
// - Support relay and enqueue tests and local development without a database.
//
// Responsibilities
// - Keep entries keyed by id, standing in for the outbox table.
// - Answer "pending, oldest first" queries the way the indexed table would.
// - Simulate an unreachable backend through `set_offline`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::core::outbox_entry::{EntryId, EntryStatus, OutboxEntry};
use crate::core::ports::{OutboxStats, OutboxStore, StoreError};
use crate::core::retry_policy::RetryPolicy;

#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: RwLock<HashMap<EntryId, OutboxEntry>>,
    is_offline: AtomicBool,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.is_offline.store(offline, Ordering::SeqCst);
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Drop a row behind the relay's back, as a concurrent cleanup job would.
    pub async fn remove(&self, id: EntryId) -> Option<OutboxEntry> {
        self.rows.write().await.remove(&id)
    }

    async fn oldest_pending<F>(&self, batch_size: usize, include: F) -> Vec<OutboxEntry>
    where
        F: Fn(&OutboxEntry) -> bool,
    {
        let guard = self.rows.read().await;
        let mut pending: Vec<OutboxEntry> = guard
            .values()
            .filter(|entry| entry.is_pending() && include(entry))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(batch_size);
        pending
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("Outbox store offline".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save(&self, entry: OutboxEntry) -> Result<u64, StoreError> {
        self.ensure_online()?;
        let mut guard = self.rows.write().await;
        if guard.contains_key(&entry.id) {
            return Err(StoreError::Conflict(entry.id));
        }
        guard.insert(entry.id, entry);
        Ok(1)
    }

    async fn fetch_unprocessed(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.ensure_online()?;
        Ok(self.oldest_pending(batch_size, |_| true).await)
    }

    async fn fetch_due(
        &self,
        batch_size: usize,
        retry: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .oldest_pending(batch_size, |entry| retry.is_due(entry, now))
            .await)
    }

    async fn mark_processed(&self, id: EntryId) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut guard = self.rows.write().await;
        let entry = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !entry.mark_processed(Utc::now()) {
            tracing::warn!(entry_id = %id, "Outbox entry already marked as processed");
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EntryId, error: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut guard = self.rows.write().await;
        let entry = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.mark_failed(error, Utc::now());
        Ok(())
    }

    async fn mark_dead_lettered(&self, id: EntryId, reason: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut guard = self.rows.write().await;
        let entry = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.mark_dead_lettered(reason, Utc::now()) {
            tracing::warn!(entry_id = %id, reason, "Outbox entry dead-lettered");
        }
        Ok(())
    }

    async fn requeue(&self, id: EntryId) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut guard = self.rows.write().await;
        let entry = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.requeue();
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<OutboxEntry>, StoreError> {
        self.ensure_online()?;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn stats(&self) -> Result<OutboxStats, StoreError> {
        self.ensure_online()?;
        let guard = self.rows.read().await;
        let mut stats = OutboxStats::default();
        for entry in guard.values() {
            match entry.status() {
                EntryStatus::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending_at = Some(match stats.oldest_pending_at {
                        Some(oldest) => oldest.min(entry.created_at),
                        None => entry.created_at,
                    });
                }
                EntryStatus::Delivered => stats.delivered += 1,
                EntryStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod in_memory_outbox_store_tests {
    use super::*;
    use crate::core::retry_policy::Backoff;
    use crate::test_support::fixtures::entries::entry_at;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    #[fixture]
    fn before_each() -> InMemoryOutboxStore {
        InMemoryOutboxStore::new()
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_save_and_fetch_a_pending_entry(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", r#"{"total":10}"#);
        assert_eq!(store.save(entry.clone()).await.unwrap(), 1);

        let pending = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(pending, vec![entry]);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_reject_a_duplicate_id(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", "{}");
        store.save(entry.clone()).await.unwrap();
        let result = store.save(entry.clone()).await;
        assert_eq!(result, Err(StoreError::Conflict(entry.id)));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_fetch_oldest_first_and_respect_the_batch_size(
        before_each: InMemoryOutboxStore,
    ) {
        let store = before_each;
        for second in [5, 1, 4, 2, 3] {
            store.save(entry_at("orders", second)).await.unwrap();
        }

        let batch = store.fetch_unprocessed(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(batch[0].key, "key-1");
        assert_eq!(batch[2].key, "key-3");
        assert!(store.fetch_unprocessed(0).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_break_created_at_ties_by_id(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let first = entry_at("orders", 1);
        let mut second = entry_at("orders", 1);
        second.created_at = first.created_at;
        store.save(second.clone()).await.unwrap();
        store.save(first.clone()).await.unwrap();

        let batch = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(batch[0].id, first.id);
        assert_eq!(batch[1].id, second.id);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_never_return_a_processed_entry_again(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", "{}");
        store.save(entry.clone()).await.unwrap();
        store.mark_processed(entry.id).await.unwrap();

        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_keep_processed_at_when_marked_twice(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", "{}");
        store.save(entry.clone()).await.unwrap();
        store.mark_processed(entry.id).await.unwrap();
        let first = store.get(entry.id).await.unwrap().unwrap().processed_at;

        store.mark_processed(entry.id).await.unwrap();
        let second = store.get(entry.id).await.unwrap().unwrap().processed_at;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_keep_a_failed_entry_pending_with_one_more_retry(
        before_each: InMemoryOutboxStore,
    ) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", "{}");
        store.save(entry.clone()).await.unwrap();
        store.mark_failed(entry.id, "broker down").await.unwrap();

        let batch = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].retry_count, 1);
        assert_eq!(batch[0].last_error.as_deref(), Some("broker down"));
        assert!(batch[0].processed_at.is_none());
    }

    #[rstest]
    #[case::processed(true)]
    #[case::failed(false)]
    #[tokio::test]
    async fn it_should_report_unknown_ids_as_not_found(
        before_each: InMemoryOutboxStore,
        #[case] processed: bool,
    ) {
        let store = before_each;
        let id = EntryId::new();
        let result = if processed {
            store.mark_processed(id).await
        } else {
            store.mark_failed(id, "boom").await
        };
        assert_eq!(result, Err(StoreError::NotFound(id)));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_hide_dead_lettered_entries_until_requeued(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let entry = OutboxEntry::new("orders", "order-1", "{}");
        store.save(entry.clone()).await.unwrap();
        store.mark_failed(entry.id, "boom").await.unwrap();
        store.mark_dead_lettered(entry.id, "attempts exhausted").await.unwrap();
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
        let parked = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(parked.dead_letter_reason.as_deref(), Some("attempts exhausted"));

        store.requeue(entry.id).await.unwrap();
        let batch = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].retry_count, 1);
        assert!(batch[0].dead_letter_reason.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_skip_entries_still_backing_off_before_cutting_the_batch(
        before_each: InMemoryOutboxStore,
    ) {
        let store = before_each;
        let backing_off = [entry_at("orders", 1), entry_at("orders", 2)];
        for entry in &backing_off {
            store.save(entry.clone()).await.unwrap();
            store.mark_failed(entry.id, "broker down").await.unwrap();
        }
        let fresh = entry_at("orders", 3);
        store.save(fresh.clone()).await.unwrap();

        let retry = RetryPolicy::unbounded().with_backoff(Backoff::Fixed(Duration::from_secs(60)));
        let batch = store.fetch_due(2, &retry, Utc::now()).await.unwrap();
        assert_eq!(batch, vec![fresh]);

        let later = Utc::now() + chrono::Duration::seconds(61);
        let batch = store.fetch_due(2, &retry, later).await.unwrap();
        let keys: Vec<&str> = batch.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["key-1", "key-2"]);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_count_entries_per_status(before_each: InMemoryOutboxStore) {
        let store = before_each;
        let delivered = entry_at("orders", 1);
        let dead = entry_at("orders", 2);
        let pending = entry_at("orders", 3);
        for entry in [&delivered, &dead, &pending] {
            store.save(entry.clone()).await.unwrap();
        }
        store.mark_processed(delivered.id).await.unwrap();
        store.mark_dead_lettered(dead.id, "boom").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.oldest_pending_at, Some(pending.created_at));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_fail_if_the_store_is_offline(before_each: InMemoryOutboxStore) {
        let store = before_each;
        store.set_offline(true);
        let result = store.fetch_unprocessed(10).await;
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Outbox store offline")
        );
    }
}
