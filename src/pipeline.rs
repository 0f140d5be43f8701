//! One ingestion run: fetch → normalize → dedup & persist → deliver.
//!
//! Ordering guarantees:
//!
//! - An entry reaches a sink only after its row is committed to the store, so
//!   an interrupted run can leave entries "stored but not delivered", never
//!   "delivered but not stored".
//! - Sinks get the whole accepted batch in one call, after the loop, so a sink
//!   connection is opened at most once per run.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::entry;
use crate::feed::{self, FetchError, ParseError, RetryingFetcher};
use crate::sink::{SinkFanout, SinkReport};
use crate::storage::{DedupStore, StorageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Persisting,
    Delivering,
    Done,
    Failed,
}

/// Counters for one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Entries the normalizer produced.
    pub normalized: usize,
    /// Feed items dropped for lacking an id.
    pub dropped: usize,
    /// Entries already present in the store.
    pub already_seen: usize,
    /// Entries that could not be encoded.
    pub encode_failures: usize,
    /// Entries committed during this run.
    pub inserted: usize,
    pub sinks: Vec<SinkReport>,
}

pub struct IngestionPipeline {
    fetcher: RetryingFetcher,
    url: Url,
    store: DedupStore,
    fanout: SinkFanout,
    state: RunState,
}

impl IngestionPipeline {
    pub fn new(fetcher: RetryingFetcher, url: Url, store: DedupStore, fanout: SinkFanout) -> Self {
        Self {
            fetcher,
            url,
            store,
            fanout,
            state: RunState::Idle,
        }
    }

    /// Builds every component from `config`, opening the dedup store.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let url = config.feed.query().url()?;
        let fetcher = RetryingFetcher::new(&config.feed.fetcher_settings())?;
        let store = DedupStore::open_with_table(&config.db.db_file, &config.db.table).await?;
        let fanout = SinkFanout::from_config(&config.output());
        tracing::debug!(sinks = ?fanout.sink_names(), "Configured sinks");
        Ok(Self::new(fetcher, url, store, fanout))
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    fn enter(&mut self, state: RunState) {
        tracing::debug!(from = ?self.state, to = ?state, "Pipeline state");
        self.state = state;
    }

    /// Executes one pass.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Fetch`] - the feed could not be retrieved
    /// - [`PipelineError::Parse`] - the payload is not a feed document
    /// - [`PipelineError::Storage`] - the store became unavailable; entries
    ///   committed before the failure are still delivered first
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        self.enter(RunState::Fetching);
        tracing::info!(url = %self.url, "Fetching feed");
        let bytes = match self.fetcher.fetch(&self.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.enter(RunState::Failed);
                tracing::error!(error = %e, "Fetch failed, aborting run");
                return Err(e.into());
            }
        };

        self.enter(RunState::Normalizing);
        let normalized = match feed::normalize(&bytes) {
            Ok(n) => n,
            Err(e) => {
                self.enter(RunState::Failed);
                tracing::error!(error = %e, "Feed payload rejected, aborting run");
                return Err(e.into());
            }
        };
        report.normalized = normalized.entries.len();
        report.dropped = normalized.dropped;
        tracing::info!(
            entries = report.normalized,
            dropped = report.dropped,
            "Normalized feed"
        );

        self.enter(RunState::Persisting);
        let mut batch = Vec::new();
        let mut fatal = None;

        for entry in &normalized.entries {
            match self.store.exists(&entry.id).await {
                Ok(true) => {
                    report.already_seen += 1;
                    tracing::debug!(id = %entry.id, "Already stored, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }

            let payload = match entry::encode(entry) {
                Ok(p) => p,
                Err(e) => {
                    report.encode_failures += 1;
                    tracing::warn!(id = %entry.id, error = %e, "Failed to encode entry, dropping");
                    continue;
                }
            };

            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            match self.store.insert(&entry.id, &timestamp, payload.as_bytes()).await {
                Ok(_) => {
                    tracing::debug!(id = %entry.id, "Inserting");
                    report.inserted += 1;
                    batch.push(payload);
                }
                Err(StorageError::DuplicateKey(key)) => {
                    report.already_seen += 1;
                    tracing::warn!(id = %key, "Dedup key appeared between check and insert, dropping");
                }
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }
        tracing::info!(inserted = report.inserted, already_seen = report.already_seen, "Inserted new entries");

        self.enter(RunState::Delivering);
        report.sinks = self.fanout.deliver(&batch).await;
        self.fanout.shutdown().await;

        if let Some(e) = fatal {
            self.enter(RunState::Failed);
            tracing::error!(
                error = %e,
                delivered = batch.len(),
                "Dedup store unavailable, aborting run after delivering committed entries"
            );
            return Err(e.into());
        }

        self.enter(RunState::Done);
        Ok(report)
    }

    /// Closes the dedup store.
    pub async fn close(&self) {
        self.store.close().await;
    }
}
