// In memory broker implementing both transport ports.
//
// Purpose
// - Let the relay and the consumption loop run end to end in one process.
//
// Responsibilities
// - Append published records to a per-topic log (a single partition per topic).
// - Hand out consumers bound to a consumer group; committed offsets are kept per group.
// - Redeliver a record that was handed out but not committed, the way a consumer that
//   restarts from its committed position would see it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::core::ports::{
    ConsumerFactory, ConsumerTransport, Delivery, DeliveryError, PublisherTransport,
    TransportError,
};

const PARTITION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub offset: u64,
    pub key: String,
    pub payload: String,
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<BrokerRecord>>,
    committed: HashMap<(String, String), u64>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    appended: Notify,
    is_offline: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.is_offline.store(offline, Ordering::SeqCst);
    }

    pub async fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        self.state
            .lock()
            .await
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset the group will read from `topic`, 0 when it never committed.
    pub async fn committed_offset(&self, group_id: &str, topic: &str) -> u64 {
        self.state
            .lock()
            .await
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn consumer_factory(
        self: &Arc<Self>,
        group_id: impl Into<String>,
    ) -> InMemoryConsumerFactory {
        InMemoryConsumerFactory {
            broker: self.clone(),
            group_id: group_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl PublisherTransport for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), DeliveryError> {
        if self.is_offline.load(Ordering::SeqCst) {
            return Err(DeliveryError("broker unavailable".into()));
        }
        let offset = {
            let mut state = self.state.lock().await;
            let log = state.logs.entry(topic.to_string()).or_default();
            let offset = log.len() as u64;
            log.push(BrokerRecord {
                offset,
                key: key.to_string(),
                payload: payload.to_string(),
            });
            offset
        };
        self.appended.notify_waiters();
        tracing::debug!(topic, partition = PARTITION, offset, "Record appended");
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryConsumerFactory {
    broker: Arc<InMemoryBroker>,
    group_id: String,
}

#[async_trait::async_trait]
impl ConsumerFactory for InMemoryConsumerFactory {
    type Consumer = InMemoryConsumer;

    async fn create(&self) -> Result<Self::Consumer, TransportError> {
        if self.broker.is_offline.load(Ordering::SeqCst) {
            return Err(TransportError("broker unavailable".into()));
        }
        Ok(InMemoryConsumer {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
            topics: Vec::new(),
            positions: HashMap::new(),
            in_flight: None,
        })
    }
}

pub struct InMemoryConsumer {
    broker: Arc<InMemoryBroker>,
    group_id: String,
    topics: Vec<String>,
    positions: HashMap<String, u64>,
    in_flight: Option<(String, u64)>,
}

impl InMemoryConsumer {
    fn take_available(&mut self, state: &BrokerState) -> Option<Delivery> {
        if let Some((topic, offset)) = self.in_flight.take() {
            self.positions.insert(topic, offset);
        }
        for topic in &self.topics {
            let position = self.positions.get(topic).copied().unwrap_or_else(|| {
                state
                    .committed
                    .get(&(self.group_id.clone(), topic.clone()))
                    .copied()
                    .unwrap_or(0)
            });
            let Some(record) = state
                .logs
                .get(topic)
                .and_then(|log| log.get(position as usize))
            else {
                continue;
            };
            self.positions.insert(topic.clone(), position + 1);
            self.in_flight = Some((topic.clone(), position));
            return Some(Delivery {
                topic: topic.clone(),
                partition: PARTITION,
                offset: record.offset,
                key: record.key.clone(),
                payload: record.payload.clone(),
            });
        }
        None
    }
}

#[async_trait::async_trait]
impl ConsumerTransport for InMemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        for topic in topics {
            if !self.topics.contains(topic) {
                self.topics.push(topic.clone());
            }
        }
        Ok(())
    }

    async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, TransportError> {
        let broker = self.broker.clone();
        loop {
            let appended = broker.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            {
                let state = broker.state.lock().await;
                if let Some(delivery) = self.take_available(&state) {
                    return Ok(Some(delivery));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut appended => {}
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        if self.broker.is_offline.load(Ordering::SeqCst) {
            return Err(TransportError("broker unavailable".into()));
        }
        let mut state = self.broker.state.lock().await;
        let committed = state
            .committed
            .entry((self.group_id.clone(), delivery.topic.clone()))
            .or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        if self
            .in_flight
            .as_ref()
            .is_some_and(|(topic, offset)| *topic == delivery.topic && *offset == delivery.offset)
        {
            self.in_flight = None;
        }
        Ok(())
    }
}
