use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use outbox_relay::adapters::in_memory::in_memory_broker::InMemoryBroker;
use outbox_relay::adapters::in_memory::in_memory_outbox_store::InMemoryOutboxStore;
use outbox_relay::adapters::processors::logging_processor::LoggingProcessor;
use outbox_relay::shell::config::AppConfig;
use outbox_relay::shell::http::router;
use outbox_relay::shell::state::AppState;
use outbox_relay::shell::workers::{spawn_relay, start_consumer};

const RELAY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = AppConfig::from_env()?;

    // In-memory deps for now
    let store = Arc::new(InMemoryOutboxStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let cancel = CancellationToken::new();

    let relay = spawn_relay(store.clone(), broker.clone(), config.relay, cancel.clone());
    let mut consumer = start_consumer(
        Arc::new(broker.consumer_factory(config.consumer_group.clone())),
        Arc::new(LoggingProcessor::new().with_simulated_work(Duration::from_millis(500))),
        &config.consumer_topics,
        config.consumer,
        cancel.clone(),
    )
    .await?;

    let app = router(AppState::new(store));
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    tracing::info!("Outbox endpoint: http://{}/outbox", config.http_addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    match tokio::time::timeout(RELAY_SHUTDOWN_TIMEOUT, relay).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Relay task ended abnormally"),
        Err(_) => tracing::warn!("Relay did not stop within the shutdown timeout"),
    }
    consumer.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
