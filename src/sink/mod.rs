//! Output sinks for newly accepted entries.
//!
//! A [`SinkFanout`] hands each run's batch of encoded entries to every
//! configured [`Sink`] in a fixed order (file, then queue). Sinks are
//! isolated from each other: one failing does not stop the rest, and nothing
//! a sink does can undo the dedup store commit that preceded it.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::OutputConfig;

pub mod file;
pub mod queue;

pub use file::FileSink;
pub use queue::{LapinConnector, QueueChannel, QueueConnector, QueueSink};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink '{sink}' unavailable: {reason}")]
    Unavailable { sink: String, reason: String },
}

impl SinkError {
    pub fn unavailable(sink: &str, reason: impl std::fmt::Display) -> Self {
        SinkError::Unavailable {
            sink: sink.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A destination for encoded entries.
#[async_trait]
pub trait Sink: Send {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Deliver the whole batch, in order. Returns how many payloads were handed
    /// off before any failure.
    async fn deliver(&mut self, batch: &[String]) -> Result<usize, SinkError>;

    /// Release any held resources. Called once after the last delivery.
    async fn shutdown(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Outcome of one delivery for one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: String,
    pub delivered: usize,
    pub error: Option<String>,
}

impl SinkReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The enabled sinks, in delivery order.
#[derive(Default)]
pub struct SinkFanout {
    sinks: Vec<Box<dyn Sink>>,
}

impl SinkFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sink; delivery follows insertion order.
    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Wires the sinks enabled in `output`, talking AMQP through `lapin`.
    pub fn from_config(output: &OutputConfig) -> Self {
        let connector = output.amqp.enabled.then(|| LapinConnector::from_config(&output.amqp));
        Self::build(output, connector)
    }

    /// Wires the sinks enabled in `output` with a caller-supplied broker
    /// connector. The connector is ignored when the queue sink is disabled.
    pub fn build<C: QueueConnector + 'static>(output: &OutputConfig, connector: Option<C>) -> Self {
        let mut fanout = Self::new();
        if output.file.enabled {
            fanout = fanout.with_sink(FileSink::new(&output.file.out_file));
        }
        if output.amqp.enabled {
            match connector {
                Some(connector) => fanout = fanout.with_sink(QueueSink::new(connector)),
                None => tracing::warn!("Queue sink enabled but no broker connector supplied"),
            }
        }
        fanout
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Hands `batch` to every sink, continuing past failures.
    pub async fn deliver(&mut self, batch: &[String]) -> Vec<SinkReport> {
        let mut reports = Vec::with_capacity(self.sinks.len());

        for sink in self.sinks.iter_mut() {
            let report = match sink.deliver(batch).await {
                Ok(delivered) => {
                    tracing::info!(sink = sink.name(), delivered = delivered, "Delivered batch");
                    SinkReport {
                        sink: sink.name().to_string(),
                        delivered,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(sink = sink.name(), error = %e, "Sink delivery failed");
                    SinkReport {
                        sink: sink.name().to_string(),
                        delivered: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        reports
    }

    /// Shuts every sink down, logging failures.
    pub async fn shutdown(&mut self) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.shutdown().await {
                tracing::warn!(sink = sink.name(), error = %e, "Sink shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(&mut self, batch: &[String]) -> Result<usize, SinkError> {
            if self.fail {
                return Err(SinkError::unavailable(self.name, "boom"));
            }
            self.seen.lock().unwrap().extend(batch.iter().cloned());
            Ok(batch.len())
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_sinks() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = SinkFanout::new()
            .with_sink(Recording {
                name: "broken",
                seen: first.clone(),
                fail: true,
            })
            .with_sink(Recording {
                name: "healthy",
                seen: second.clone(),
                fail: false,
            });

        let batch = vec!["{\"id\":\"a\"}".to_string(), "{\"id\":\"b\"}".to_string()];
        let reports = fanout.deliver(&batch).await;

        assert_eq!(reports.len(), 2);
        assert!(!reports[0].is_ok());
        assert!(reports[0].error.as_deref().unwrap().contains("boom"));
        assert!(reports[1].is_ok());
        assert_eq!(reports[1].delivered, 2);
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), batch);
    }

    #[tokio::test]
    async fn test_delivery_follows_insertion_order() {
        let fanout = SinkFanout::new()
            .with_sink(Recording {
                name: "one",
                seen: Arc::default(),
                fail: false,
            })
            .with_sink(Recording {
                name: "two",
                seen: Arc::default(),
                fail: false,
            });
        assert_eq!(fanout.sink_names(), vec!["one", "two"]);
    }
}
