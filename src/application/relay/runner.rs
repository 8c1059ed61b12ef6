// Outbox relay drains pending entries into the broker.
//
// Purpose
// - Deliver every persisted entry at least once, oldest first.
// - Record each attempt's outcome in the store so failures are retried on later cycles.
//
// Guarantees
// - Entries of one batch are handled strictly one after another.
// - A failing entry never blocks the loop; it is marked failed and the batch moves on.
// - Cancellation lets the in-flight publish finish, then the loop exits.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::errors::RelayError;
use crate::core::outbox_entry::OutboxEntry;
use crate::core::ports::{DEFAULT_BATCH_SIZE, OutboxStore, PublisherTransport};
use crate::core::retry_policy::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub failure_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            failure_delay: Duration::from_millis(100),
            retry: RetryPolicy::unbounded(),
        }
    }
}

impl RelayConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_failure_delay(mut self, failure_delay: Duration) -> Self {
        self.failure_delay = failure_delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Outcome counters of one relay cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

enum Attempt {
    Delivered,
    Failed { dead_lettered: bool },
}

pub struct OutboxRelay<TStore, TPublisher>
where
    TStore: OutboxStore + 'static,
    TPublisher: PublisherTransport + 'static,
{
    store: Arc<TStore>,
    publisher: Arc<TPublisher>,
    config: RelayConfig,
}

impl<TStore, TPublisher> OutboxRelay<TStore, TPublisher>
where
    TStore: OutboxStore + 'static,
    TPublisher: PublisherTransport + 'static,
{
    pub fn new(store: Arc<TStore>, publisher: Arc<TPublisher>, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Poll until `cancel` fires. Errors are logged and retried after one poll interval.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = ?self.config.retry.max_attempts,
            "Outbox relay starting"
        );

        while !cancel.is_cancelled() {
            match self.run_cycle(&cancel).await {
                Ok(report) if report.fetched > 0 => info!(
                    fetched = report.fetched,
                    delivered = report.delivered,
                    failed = report.failed,
                    dead_lettered = report.dead_lettered,
                    "Outbox relay cycle finished"
                ),
                Ok(_) => debug!("No pending outbox entries"),
                Err(e) => error!(error = %e, "Outbox relay cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Outbox relay stopped");
    }

    /// One fetch-and-deliver pass over the oldest pending entries.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, RelayError> {
        let batch = self
            .store
            .fetch_due(self.config.batch_size, &self.config.retry, Utc::now())
            .await?;
        let mut report = CycleReport {
            fetched: batch.len(),
            ..Default::default()
        };

        for entry in batch {
            if cancel.is_cancelled() {
                debug!("Outbox relay cancelled mid-batch");
                break;
            }

            match self.attempt(&entry).await? {
                Attempt::Delivered => report.delivered += 1,
                Attempt::Failed { dead_lettered } => {
                    report.failed += 1;
                    if dead_lettered {
                        report.dead_lettered += 1;
                    }
                    self.pause_after_failure(cancel).await;
                }
            }
        }

        Ok(report)
    }

    async fn attempt(&self, entry: &OutboxEntry) -> Result<Attempt, RelayError> {
        debug!(
            entry_id = %entry.id,
            topic = %entry.topic,
            retry_count = entry.retry_count,
            "Publishing outbox entry"
        );

        match self
            .publisher
            .publish(&entry.topic, &entry.key, &entry.payload)
            .await
        {
            Ok(()) => {
                self.store.mark_processed(entry.id).await?;
                info!(entry_id = %entry.id, topic = %entry.topic, "Outbox entry published");
                Ok(Attempt::Delivered)
            }
            Err(e) => {
                let message = format!("failed to publish: {e}");
                let retry_count = entry.retry_count.saturating_add(1);
                warn!(
                    entry_id = %entry.id,
                    topic = %entry.topic,
                    retry_count,
                    error = %e,
                    "Outbox entry delivery failed"
                );
                self.store.mark_failed(entry.id, &message).await?;

                let exhausted = self.config.retry.is_exhausted(retry_count);
                if exhausted {
                    self.store.mark_dead_lettered(entry.id, &message).await?;
                    error!(
                        entry_id = %entry.id,
                        topic = %entry.topic,
                        retry_count,
                        last_error = %message,
                        "Outbox entry exceeded max attempts, dead-lettered"
                    );
                }
                Ok(Attempt::Failed {
                    dead_lettered: exhausted,
                })
            }
        }
    }

    async fn pause_after_failure(&self, cancel: &CancellationToken) {
        if self.config.failure_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.failure_delay) => {}
        }
    }
}
