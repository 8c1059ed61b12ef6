use chrono::{DateTime, Utc};

use crate::core::ports::Delivery;

/// A consumed message as seen by a `MessageProcessor`, detached from the transport's record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

impl From<&Delivery> for ReceivedMessage {
    fn from(delivery: &Delivery) -> Self {
        Self::new(
            delivery.topic.clone(),
            delivery.key.clone(),
            delivery.payload.clone(),
        )
    }
}
