//! RabbitMQ consumer module using lapin.
//!
//! This module owns the broker connection, declares the status exchange and
//! the worker's private queue, and pumps deliveries through the
//! [`StatusHandler`] one at a time. A delivery is acknowledged only after its
//! record update has been written; failed deliveries are left unacknowledged.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::signal;
use tracing::{error, info, warn};

use status_worker::{Ack, Notification, RequestStore, Settings, StatusHandler};

/// Sends the acknowledgement for a delivery.
///
/// Implemented by the lapin channel; kept as a seam so the ack decision can be
/// exercised without a broker.
pub trait Acknowledger {
    async fn ack(&self, delivery_tag: u64) -> lapin::Result<()>;
}

impl Acknowledger for Channel {
    async fn ack(&self, delivery_tag: u64) -> lapin::Result<()> {
        self.basic_ack(delivery_tag, BasicAckOptions::default()).await
    }
}

/// Broker resources held for the lifetime of the worker.
pub struct StatusConsumer {
    connection: Connection,
    channel: Channel,
}

impl StatusConsumer {
    /// Open the connection and channel.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        info!(url_length = settings.broker_url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(&settings.broker_url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_connected");

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(200, "Channel setup failed").await {
                    warn!(error = %close_err, "rabbitmq_connection_close_error");
                }
                return Err(e).context("Failed to create channel");
            }
        };

        info!("rabbitmq_channel_created");

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare the exchange, the private queue and the binding.
    ///
    /// Returns the server-generated queue name.
    pub async fn declare_topology(&self, settings: &Settings) -> Result<String> {
        if settings.prefetch_count > 0 {
            self.channel
                .basic_qos(settings.prefetch_count, BasicQosOptions::default())
                .await
                .context("Failed to set QoS")?;

            info!(prefetch_count = settings.prefetch_count, "rabbitmq_qos_set");
        }

        // A pre-existing exchange with different properties fails here
        self.channel
            .exchange_declare(
                &settings.exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare exchange {}", settings.exchange_name))?;

        info!(exchange = %settings.exchange_name, "rabbitmq_exchange_declared");

        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare queue")?;

        let queue_name = queue.name().as_str().to_string();

        info!(queue = %queue_name, "rabbitmq_queue_declared");

        self.channel
            .queue_bind(
                &queue_name,
                &settings.exchange_name,
                &settings.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to bind queue")?;

        info!(
            queue = %queue_name,
            exchange = %settings.exchange_name,
            binding_key = %settings.binding_key,
            "rabbitmq_queue_bound"
        );

        Ok(queue_name)
    }

    /// Consume deliveries until a shutdown signal or a broker-level failure.
    ///
    /// Each delivery is handled to completion, acknowledgement included,
    /// before the next one is taken off the stream.
    pub async fn consume(
        &self,
        settings: &Settings,
        queue_name: &str,
        handler: &StatusHandler,
    ) -> Result<()> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue_name,
                &settings.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to start consumer")?;

        info!(queue = %queue_name, consumer_tag = %settings.consumer_tag, "rabbitmq_consumer_started");
        info!("worker_ready");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker_stopping");
                    self.cancel(&settings.consumer_tag).await;
                    return Ok(());
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let notification = Notification::from(delivery);
                            process_notification(handler, &self.channel, &notification).await;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "rabbitmq_delivery_error");
                            return Err(e).context("Consumer stream failed");
                        }
                        None => {
                            warn!("rabbitmq_consumer_closed");
                            bail!("Consumer stream closed by the broker");
                        }
                    }
                }
            }
        }
    }

    async fn cancel(&self, consumer_tag: &str) {
        if !self.channel.status().connected() {
            return;
        }

        if let Err(e) = self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "rabbitmq_cancel_error");
        }
    }

    /// Close the channel and the connection.
    pub async fn close(self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_connection_closed");
    }
}

/// Run the status worker.
///
/// This function:
/// 1. Connects to RabbitMQ using the configured URL
/// 2. Declares the topic exchange and binds a private queue to it
/// 3. Applies status notifications one by one, acknowledging successes
/// 4. Closes the connection on every exit path once connected
pub async fn run(settings: Settings) -> Result<()> {
    let store = RequestStore::new(settings.storage_path.clone());
    if !store.root().is_dir() {
        warn!(storage_path = %store.root().display(), "storage_root_missing");
    }
    let handler = StatusHandler::new(store);

    let consumer = StatusConsumer::connect(&settings).await?;

    let result = match consumer.declare_topology(&settings).await {
        Ok(queue_name) => consumer.consume(&settings, &queue_name, &handler).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "worker_failed");
    }

    consumer.close().await;

    info!("worker_shutdown_complete");
    result
}

/// Apply one notification and acknowledge it on success.
///
/// Returns the applied transition when the delivery was acknowledged.
pub async fn process_notification<A: Acknowledger>(
    handler: &StatusHandler,
    acker: &A,
    notification: &Notification,
) -> Option<Ack> {
    let delivery_tag = notification.delivery_tag;

    info!(
        routing_key = %notification.routing_key,
        delivery_tag = delivery_tag,
        redelivered = notification.redelivered,
        body_length = notification.body.len(),
        "rabbitmq_status_received"
    );

    let ack = match handler.handle(notification) {
        Ok(ack) => ack,
        Err(e) => {
            error!(
                routing_key = %notification.routing_key,
                delivery_tag = delivery_tag,
                reason = e.reason(),
                error = %e,
                body_preview = %String::from_utf8_lossy(
                    &notification.body[..notification.body.len().min(200)]
                ),
                "status_update_failed"
            );
            return None;
        }
    };

    if let Err(e) = acker.ack(delivery_tag).await {
        error!(
            delivery_tag = delivery_tag,
            request_id = %ack.request_id,
            previous_status = %ack.previous,
            status = %ack.status,
            error = %e,
            "rabbitmq_ack_failed"
        );
        return None;
    }

    info!(
        request_id = %ack.request_id,
        previous_status = %ack.previous,
        status = %ack.status,
        "status_applied"
    );

    Some(ack)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
