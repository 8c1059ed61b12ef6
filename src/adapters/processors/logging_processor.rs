// MessageProcessor that writes every consumed message to the log.
//
// JSON payloads are pretty-printed; anything else is logged as received.
// Logging is idempotent, so redelivered duplicates are harmless here.

use std::time::Duration;

use crate::core::ports::{MessageProcessor, ProcessingError};
use crate::core::received_message::ReceivedMessage;

#[derive(Debug, Clone, Default)]
pub struct LoggingProcessor {
    simulated_work: Option<Duration>,
}

impl LoggingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep after logging, to make the processing step observable in demos.
    pub fn with_simulated_work(mut self, duration: Duration) -> Self {
        self.simulated_work = Some(duration);
        self
    }

    pub fn render_payload(payload: &str) -> String {
        serde_json::from_str::<serde_json::Value>(payload)
            .and_then(|value| serde_json::to_string_pretty(&value))
            .unwrap_or_else(|_| payload.to_string())
    }
}

#[async_trait::async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &ReceivedMessage) -> Result<(), ProcessingError> {
        tracing::info!(
            topic = %message.topic,
            key = %message.key,
            received_at = %message.received_at,
            payload = %Self::render_payload(&message.payload),
            "Processing message"
        );
        if let Some(duration) = self.simulated_work {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }
}
