// MessageProcessor double that records what it saw and can be told to fail.

use std::sync::Mutex;

use crate::core::ports::{MessageProcessor, ProcessingError};
use crate::core::received_message::ReceivedMessage;

#[derive(Default)]
pub struct RecordingProcessor {
    attempted: Mutex<Vec<ReceivedMessage>>,
    processed: Mutex<Vec<ReceivedMessage>>,
    failures_left: Mutex<usize>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls.
    pub fn fail_times(&self, times: usize) {
        *self.failures_left.lock().unwrap() = times;
    }

    pub fn attempted_keys(&self) -> Vec<String> {
        self.attempted
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.key.clone())
            .collect()
    }

    pub fn processed_keys(&self) -> Vec<String> {
        self.processed
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.key.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl MessageProcessor for RecordingProcessor {
    async fn process(&self, message: &ReceivedMessage) -> Result<(), ProcessingError> {
        self.attempted.lock().unwrap().push(message.clone());
        {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(ProcessingError("processor rejected the message".into()));
            }
        }
        self.processed.lock().unwrap().push(message.clone());
        Ok(())
    }
}
