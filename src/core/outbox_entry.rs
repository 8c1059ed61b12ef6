// Outbox entry, the durable record of an intended message send.
//
// Purpose
// - Carry the message (topic, key, opaque payload) from the enqueue call to the relay.
// - Track delivery bookkeeping: processed_at, last_error, retry_count.
//
// Invariants
// - id, topic, key, payload and created_at never change after creation.
// - processed_at is set at most once and never cleared.
// - retry_count only grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Time ordered (v7), so ties in `created_at` still sort in creation order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntryId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Delivered,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EntryId,
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub dead_letter_reason: Option<String>,
}

impl OutboxEntry {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::recorded_at(topic, key, payload, Utc::now())
    }

    pub fn recorded_at(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            created_at,
            processed_at: None,
            last_error: None,
            retry_count: 0,
            last_attempted_at: None,
            dead_lettered_at: None,
            dead_letter_reason: None,
        }
    }

    pub fn status(&self) -> EntryStatus {
        if self.processed_at.is_some() {
            EntryStatus::Delivered
        } else if self.dead_lettered_at.is_some() {
            EntryStatus::DeadLettered
        } else {
            EntryStatus::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == EntryStatus::Pending
    }

    /// Returns false when the entry was already delivered; the first timestamp wins.
    pub fn mark_processed(&mut self, at: DateTime<Utc>) -> bool {
        if self.processed_at.is_some() {
            return false;
        }
        self.processed_at = Some(at);
        true
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.last_error = Some(error.into());
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempted_at = Some(at);
    }

    pub fn mark_dead_lettered(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.status() != EntryStatus::Pending {
            return false;
        }
        self.dead_lettered_at = Some(at);
        self.dead_letter_reason = Some(reason.into());
        true
    }

    /// Back to pending. `retry_count` and `last_error` are kept.
    pub fn requeue(&mut self) -> bool {
        self.dead_letter_reason = None;
        self.dead_lettered_at.take().is_some()
    }
}
