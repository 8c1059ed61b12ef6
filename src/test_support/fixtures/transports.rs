// Transport doubles with scripted outcomes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::ports::{
    ConsumerFactory, ConsumerTransport, Delivery, DeliveryError, PublisherTransport,
    TransportError,
};

type Hook = Box<dyn Fn() + Send + Sync>;

/// Publisher that fails for selected keys and records every attempt.
#[derive(Default)]
pub struct ScriptedPublisher {
    failing_keys: Mutex<HashSet<String>>,
    attempted: Mutex<Vec<String>>,
    published: Mutex<Vec<String>>,
    before_publish: Mutex<Option<Hook>>,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
    }

    pub fn before_publish(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_publish.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn attempted_keys(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PublisherTransport for ScriptedPublisher {
    async fn publish(&self, _topic: &str, key: &str, _payload: &str) -> Result<(), DeliveryError> {
        if let Some(hook) = self.before_publish.lock().unwrap().as_ref() {
            hook();
        }
        self.attempted.lock().unwrap().push(key.to_string());
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(DeliveryError(format!("broker rejected {key}")));
        }
        self.published.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Consumers that keep yielding the head of a fixed queue until it is committed.
#[derive(Default)]
pub struct ScriptedConsumerFactory {
    queue: Arc<Mutex<VecDeque<Delivery>>>,
    commits: Arc<Mutex<Vec<Delivery>>>,
}

impl ScriptedConsumerFactory {
    pub fn with_messages(messages: &[(&str, &str)]) -> Self {
        Self {
            queue: Arc::new(Mutex::new(deliveries(messages))),
            commits: Arc::default(),
        }
    }

    pub fn commits(&self) -> Vec<Delivery> {
        self.commits.lock().unwrap().clone()
    }
}

pub struct ScriptedConsumer {
    queue: Arc<Mutex<VecDeque<Delivery>>>,
    commits: Arc<Mutex<Vec<Delivery>>>,
}

#[async_trait::async_trait]
impl ConsumerFactory for ScriptedConsumerFactory {
    type Consumer = ScriptedConsumer;

    async fn create(&self) -> Result<Self::Consumer, TransportError> {
        Ok(ScriptedConsumer {
            queue: self.queue.clone(),
            commits: self.commits.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ConsumerTransport for ScriptedConsumer {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, TransportError> {
        let head = self.queue.lock().unwrap().front().cloned();
        match head {
            Some(delivery) => {
                tokio::task::yield_now().await;
                Ok(Some(delivery))
            }
            None => {
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut queue = self.queue.lock().unwrap();
        if queue.front() == Some(delivery) {
            queue.pop_front();
        }
        self.commits.lock().unwrap().push(delivery.clone());
        Ok(())
    }
}

fn deliveries(messages: &[(&str, &str)]) -> VecDeque<Delivery> {
    messages
        .iter()
        .enumerate()
        .map(|(offset, (topic, key))| Delivery {
            topic: topic.to_string(),
            partition: 0,
            offset: offset as u64,
            key: key.to_string(),
            payload: "{}".to_string(),
        })
        .collect()
}

#[derive(Default)]
struct FlakyState {
    queue: VecDeque<Delivery>,
    polls_to_fail: usize,
    poll_errors: usize,
    fail_commits: bool,
    commit_attempts: usize,
}

/// Consumers whose polls fail a number of times and whose commits can be made to fail.
/// Each record is handed out once, so a failed commit does not bring it back.
pub struct FlakyConsumerFactory {
    state: Arc<Mutex<FlakyState>>,
}

impl FlakyConsumerFactory {
    pub fn with_messages(messages: &[(&str, &str)]) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlakyState {
                queue: deliveries(messages),
                ..Default::default()
            })),
        }
    }

    pub fn fail_polls(self, times: usize) -> Self {
        self.state.lock().unwrap().polls_to_fail = times;
        self
    }

    pub fn fail_commits(self) -> Self {
        self.state.lock().unwrap().fail_commits = true;
        self
    }

    pub fn poll_errors(&self) -> usize {
        self.state.lock().unwrap().poll_errors
    }

    pub fn commit_attempts(&self) -> usize {
        self.state.lock().unwrap().commit_attempts
    }
}

pub struct FlakyConsumer {
    state: Arc<Mutex<FlakyState>>,
}

#[async_trait::async_trait]
impl ConsumerFactory for FlakyConsumerFactory {
    type Consumer = FlakyConsumer;

    async fn create(&self) -> Result<Self::Consumer, TransportError> {
        Ok(FlakyConsumer {
            state: self.state.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ConsumerTransport for FlakyConsumer {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, TransportError> {
        let head = {
            let mut state = self.state.lock().unwrap();
            if state.polls_to_fail > 0 {
                state.polls_to_fail -= 1;
                state.poll_errors += 1;
                return Err(TransportError("connection reset".into()));
            }
            state.queue.pop_front()
        };
        match head {
            Some(delivery) => Ok(Some(delivery)),
            None => {
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, _delivery: &Delivery) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.commit_attempts += 1;
        if state.fail_commits {
            return Err(TransportError("commit rejected".into()));
        }
        Ok(())
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 2s");
}
