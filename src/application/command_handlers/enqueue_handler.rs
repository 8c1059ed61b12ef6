// Enqueue command handler, the write side of the outbox.
//
// Responsibilities
// - Validate topic, key and payload.
// - Serialize the payload into the store's opaque text format.
// - Persist a new entry and return only once the store acknowledged it.
//
// The broker is never contacted here; delivery belongs to the relay.

use serde::Serialize;
use std::sync::Arc;

use crate::application::errors::EnqueueError;
use crate::core::outbox_entry::{EntryId, OutboxEntry};
use crate::core::ports::OutboxStore;

pub struct EnqueueHandler<TStore>
where
    TStore: OutboxStore + 'static,
{
    store: Arc<TStore>,
}

impl<TStore> Clone for EnqueueHandler<TStore>
where
    TStore: OutboxStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<TStore> EnqueueHandler<TStore>
where
    TStore: OutboxStore + 'static,
{
    pub fn new(store: Arc<TStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue<TPayload>(
        &self,
        topic: &str,
        key: &str,
        payload: &TPayload,
    ) -> Result<EntryId, EnqueueError>
    where
        TPayload: Serialize + ?Sized + Sync,
    {
        if topic.trim().is_empty() {
            return Err(EnqueueError::Validation("topic cannot be empty".into()));
        }
        if key.trim().is_empty() {
            return Err(EnqueueError::Validation("key cannot be empty".into()));
        }

        let value = serde_json::to_value(payload)?;
        if value.is_null() {
            return Err(EnqueueError::Validation("payload must be present".into()));
        }
        let serialized = serde_json::to_string(&value)?;

        let entry = OutboxEntry::new(topic, key, serialized);
        let id = entry.id;
        self.store.save(entry).await?;

        tracing::debug!(entry_id = %id, topic, key, "Outbox entry enqueued");
        Ok(id)
    }
}
