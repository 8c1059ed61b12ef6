// Outbox entries with deterministic creation times.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::core::outbox_entry::OutboxEntry;

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

/// Entry created `second` seconds after the fixture epoch, keyed `key-{second}`.
pub fn entry_at(topic: &str, second: i64) -> OutboxEntry {
    OutboxEntry::recorded_at(
        topic,
        format!("key-{second}"),
        format!(r#"{{"seq":{second}}}"#),
        epoch() + TimeDelta::seconds(second),
    )
}
