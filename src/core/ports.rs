// Ports define what the core needs from the outside world, without implementing it.
//
// Purpose
// - Describe the outbox store, the broker's produce side and its consume side as traits.
// - Describe the pluggable business handler invoked per consumed message.
//
// Boundaries
// - No concrete input or output here. Adapters implement these traits in the adapters layer.
//
// Testing guidance
// - In memory implementations live in adapters::in_memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::outbox_entry::{EntryId, OutboxEntry};
use crate::core::received_message::ReceivedMessage;
use crate::core::retry_policy::RetryPolicy;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("outbox entry {0} not found")]
    NotFound(EntryId),

    #[error("outbox entry {0} already exists")]
    Conflict(EntryId),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new entry. Returns the number of rows written.
    async fn save(&self, entry: OutboxEntry) -> Result<u64, StoreError>;

    /// Pending entries, oldest first (ties broken by id), at most `batch_size` of them.
    async fn fetch_unprocessed(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Pending entries that `retry` considers due at `now`, in the same order.
    /// Entries still backing off are skipped before the batch is cut, so they never
    /// take the place of newer due entries.
    async fn fetch_due(
        &self,
        batch_size: usize,
        retry: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Idempotent: marking an already delivered entry keeps its original `processed_at`.
    async fn mark_processed(&self, id: EntryId) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: EntryId, error: &str) -> Result<(), StoreError>;

    async fn mark_dead_lettered(&self, id: EntryId, reason: &str) -> Result<(), StoreError>;

    /// Return a dead-lettered entry to pending. `retry_count` is left as is.
    async fn requeue(&self, id: EntryId) -> Result<(), StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<OutboxEntry>, StoreError>;

    async fn stats(&self) -> Result<OutboxStats, StoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait PublisherTransport: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// A record as handed out by the consume side of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: String,
}

#[async_trait]
pub trait ConsumerTransport: Send {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Blocks until a record is available. Returns `Ok(None)` once `cancel` fires.
    async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, TransportError>;

    /// Advance the durable read position past `delivery`.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    type Consumer: ConsumerTransport + 'static;

    async fn create(&self) -> Result<Self::Consumer, TransportError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("processing failed: {0}")]
pub struct ProcessingError(pub String);

/// Business handler for consumed messages.
///
/// Delivery is at-least-once: a message whose processing succeeded may still be handed
/// in again (crash before commit, relay retry after a lost acknowledgement). Implementations
/// must treat duplicates as harmless.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &ReceivedMessage) -> Result<(), ProcessingError>;
}
