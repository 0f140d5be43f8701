//! Message-queue sink.
//!
//! Publishes each encoded entry as its own text message. The broker
//! transport sits behind [`QueueConnector`] / [`QueueChannel`] so the sink's
//! lifecycle (lazy connect, release on shutdown) does not depend on a live
//! broker; [`LapinConnector`] is the AMQP 0-9-1 implementation.

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use secrecy::{ExposeSecret, SecretString};

use super::{Sink, SinkError};
use crate::config::AmqpConfig;

const SINK_NAME: &str = "queue";

/// Non-persistent delivery mode (AMQP `delivery-mode = 1`).
const TRANSIENT_DELIVERY: u8 = 1;

/// Opens a publishing session against a broker.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueueChannel>, SinkError>;
}

/// An open publishing session bound to one destination.
#[async_trait]
pub trait QueueChannel: Send {
    async fn publish(&mut self, message: &str) -> Result<(), SinkError>;

    /// Releases the session and its connection.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Sink that publishes one message per entry, connecting on first use.
pub struct QueueSink {
    connector: Box<dyn QueueConnector>,
    channel: Option<Box<dyn QueueChannel>>,
}

impl QueueSink {
    pub fn new(connector: impl QueueConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            channel: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }
}

#[async_trait]
impl Sink for QueueSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn deliver(&mut self, batch: &[String]) -> Result<usize, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }

        if self.channel.is_none() {
            tracing::debug!("Connecting to message broker");
            self.channel = Some(self.connector.connect().await?);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(SinkError::unavailable(SINK_NAME, "no open channel"));
        };

        for (sent, message) in batch.iter().enumerate() {
            if let Err(e) = channel.publish(message).await {
                tracing::warn!(sent = sent, total = batch.len(), "Publish failed, dropping channel");
                if let Some(mut broken) = self.channel.take() {
                    let _ = broken.close().await;
                }
                return Err(e);
            }
        }

        Ok(batch.len())
    }

    async fn shutdown(&mut self) -> Result<(), SinkError> {
        match self.channel.take() {
            Some(mut channel) => channel.close().await,
            None => Ok(()),
        }
    }
}

// ============================================================================
// AMQP (lapin)
// ============================================================================

/// Connects to an AMQP 0-9-1 broker and publishes to a named queue through the
/// default exchange.
pub struct LapinConnector {
    uri: SecretString,
    queue: String,
    client_id: String,
}

impl LapinConnector {
    pub fn new(uri: SecretString, queue: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            uri,
            queue: queue.into(),
            client_id: client_id.into(),
        }
    }

    pub fn from_config(config: &AmqpConfig) -> Self {
        Self::new(
            SecretString::from(config.connection_url.clone().unwrap_or_default()),
            config.queue_name.clone().unwrap_or_default(),
            config.client_id.clone().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl QueueConnector for LapinConnector {
    async fn connect(&self) -> Result<Box<dyn QueueChannel>, SinkError> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.client_id.clone().into());
        let connection = Connection::connect(self.uri.expose_secret(), properties)
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp connect: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp channel: {e}")))?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp declare: {e}")))?;

        tracing::info!(queue = %self.queue, client_id = %self.client_id, "Connected to message broker");
        Ok(Box::new(LapinChannel {
            connection,
            channel,
            queue: self.queue.clone(),
        }))
    }
}

struct LapinChannel {
    connection: Connection,
    channel: Channel,
    queue: String,
}

#[async_trait]
impl QueueChannel for LapinChannel {
    async fn publish(&mut self, message: &str) -> Result<(), SinkError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(TRANSIENT_DELIVERY)
            .with_content_type("application/json".into());
        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                message.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp publish: {e}")))?
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp confirm: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp channel close: {e}")))?;
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, format!("amqp connection close: {e}")))?;
        tracing::debug!(queue = %self.queue, "Closed broker connection");
        Ok(())
    }
}
