// Background workers owned by the binary.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::consumer::consumption_loop::{ConsumerConfig, ConsumptionLoop};
use crate::application::errors::ConsumerError;
use crate::application::relay::runner::{OutboxRelay, RelayConfig};
use crate::core::ports::{ConsumerFactory, MessageProcessor, OutboxStore, PublisherTransport};

pub fn spawn_relay<TStore, TPublisher>(
    store: Arc<TStore>,
    publisher: Arc<TPublisher>,
    config: RelayConfig,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    TStore: OutboxStore + 'static,
    TPublisher: PublisherTransport + 'static,
{
    let relay = OutboxRelay::new(store, publisher, config);
    tokio::spawn(async move { relay.run(cancel).await })
}

/// Subscribe every configured topic, then start consuming.
pub async fn start_consumer<TFactory, TProcessor>(
    factory: Arc<TFactory>,
    processor: Arc<TProcessor>,
    topics: &[String],
    config: ConsumerConfig,
    cancel: CancellationToken,
) -> Result<ConsumptionLoop<TFactory, TProcessor>, ConsumerError>
where
    TFactory: ConsumerFactory + 'static,
    TProcessor: MessageProcessor + 'static,
{
    let mut consumer = ConsumptionLoop::new(factory, processor, config);
    for topic in topics {
        consumer.subscribe(topic)?;
    }
    consumer.start(cancel).await?;
    Ok(consumer)
}
