//! Simod Status Worker - RabbitMQ consumer that keeps request records in sync.
//!
//! This worker binds a private queue to the pipeline's status exchange and
//! writes the status carried by each notification into the matching
//! `request.json`, acknowledging only after the write succeeded.

mod consumer;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use status_worker::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let settings = Settings::from_env()
        .inspect_err(|e| error!(error = %e, "config_invalid"))
        .context("Invalid configuration")?;

    tracing::info!(
        broker_url_set = !settings.broker_url.is_empty(),
        exchange = %settings.exchange_name,
        binding_key = %settings.binding_key,
        storage_path = %settings.storage_path.display(),
        consumer_tag = %settings.consumer_tag,
        prefetch_count = settings.prefetch_count,
        "config_loaded"
    );

    // Start the consumer
    consumer::run(settings).await?;

    Ok(())
}
