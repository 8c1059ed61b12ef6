// Consumption loop reads from the broker and commits only after local processing succeeded.
//
// Purpose
// - Subscribe to a set of topics, poll the consumer transport, hand each message to the
//   MessageProcessor and commit its position once the processor returned Ok.
//
// Lifecycle
// - Idle -> Subscribed -> Polling -> (Processing -> Polling)* -> Stopped.
// - `stop` returns to Idle. A task that exited on its own (parent token cancelled) no longer
//   counts as running and can be started again.
//
// Subscription policy
// - Topics are collected before `start`. `start` captures an immutable snapshot of them.
// - A `subscribe` while running is queued: it takes effect on the next `start`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::errors::ConsumerError;
use crate::core::ports::{ConsumerFactory, ConsumerTransport, MessageProcessor};
use crate::core::received_message::ReceivedMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Subscribed,
    Polling,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Pause after a failed processing call or a transport error before polling again.
    pub failure_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            failure_delay: Duration::from_millis(100),
        }
    }
}

struct RunningConsumer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    topics: Arc<[String]>,
}

pub struct ConsumptionLoop<TFactory, TProcessor>
where
    TFactory: ConsumerFactory + 'static,
    TProcessor: MessageProcessor + 'static,
{
    factory: Arc<TFactory>,
    processor: Arc<TProcessor>,
    config: ConsumerConfig,
    topics: BTreeSet<String>,
    running: Option<RunningConsumer>,
    state: watch::Sender<LoopState>,
}

impl<TFactory, TProcessor> ConsumptionLoop<TFactory, TProcessor>
where
    TFactory: ConsumerFactory + 'static,
    TProcessor: MessageProcessor + 'static,
{
    pub fn new(factory: Arc<TFactory>, processor: Arc<TProcessor>, config: ConsumerConfig) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            factory,
            processor,
            config,
            topics: BTreeSet::new(),
            running: None,
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Every topic collected so far, including ones queued while running.
    pub fn subscriptions(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }

    /// Topics the running consumer is bound to.
    pub fn active_topics(&self) -> Option<Arc<[String]>> {
        self.running.as_ref().map(|running| running.topics.clone())
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), ConsumerError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ConsumerError::Validation("topic cannot be empty".into()));
        }
        if !self.topics.insert(topic.to_string()) {
            return Ok(());
        }

        if self.is_running() {
            info!(topic, "Subscription queued until the consumer restarts");
        } else {
            info!(topic, "Subscribed to topic");
            self.state.send_replace(LoopState::Subscribed);
        }
        Ok(())
    }

    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        if self.is_running() {
            return Err(ConsumerError::AlreadyRunning);
        }
        if let Some(finished) = self.running.take() {
            if let Err(e) = finished.handle.await {
                error!(error = %e, "Consumer task ended abnormally");
            }
        }

        let topics: Arc<[String]> = self.topics.iter().cloned().collect();
        if topics.is_empty() {
            warn!("Starting consumer without any subscribed topic");
        }

        let mut consumer = self.factory.create().await?;
        consumer.subscribe(&topics).await?;

        let cancel = cancel.child_token();
        self.state.send_replace(LoopState::Polling);
        let handle = tokio::spawn(consume(
            consumer,
            self.processor.clone(),
            cancel.clone(),
            self.state.clone(),
            self.config.failure_delay,
        ));

        info!(topics = ?topics, "Consumer started");
        self.running = Some(RunningConsumer {
            cancel,
            handle,
            topics,
        });
        Ok(())
    }

    /// Cancel the consume task and wait for it to finish. A no-op when not started.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "Consumer task ended abnormally");
        }

        self.state.send_replace(LoopState::Idle);
        info!("Consumer stopped");
    }
}

async fn consume<TConsumer, TProcessor>(
    mut consumer: TConsumer,
    processor: Arc<TProcessor>,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
    failure_delay: Duration,
) where
    TConsumer: ConsumerTransport,
    TProcessor: MessageProcessor + ?Sized,
{
    while !cancel.is_cancelled() {
        let delivery = match consumer.next(&cancel).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Error consuming message");
                pause(&cancel, failure_delay).await;
                continue;
            }
        };

        state.send_replace(LoopState::Processing);
        let message = ReceivedMessage::from(&delivery);
        match processor.process(&message).await {
            Ok(()) => match consumer.commit(&delivery).await {
                Ok(()) => debug!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Offset committed"
                ),
                Err(e) => error!(
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    error = %e,
                    "Failed to commit offset, message will be redelivered"
                ),
            },
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    key = %delivery.key,
                    offset = delivery.offset,
                    error = %e,
                    "Message processing failed, offset not committed"
                );
                state.send_replace(LoopState::Polling);
                pause(&cancel, failure_delay).await;
                continue;
            }
        }
        state.send_replace(LoopState::Polling);
    }

    state.send_replace(LoopState::Stopped);
    debug!("Consume loop exited");
}

async fn pause(cancel: &CancellationToken, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
