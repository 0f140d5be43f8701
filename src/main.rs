use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use arxiv_ingest::config::{Config, ConfigError};
use arxiv_ingest::entry;
use arxiv_ingest::pipeline::IngestionPipeline;
use arxiv_ingest::storage::DedupStore;

#[derive(Parser, Debug)]
#[command(
    name = "arxiv-ingest",
    about = "Fetch new arXiv entries, record them, and forward them to the configured outputs"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "./config/config.toml")]
    config: PathBuf,

    /// Write every stored entry as JSON lines to FILE instead of running an ingest pass
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

/// Dump the whole dedup history, one decoded entry per line.
async fn export(config: &Config, out: &Path) -> Result<usize> {
    let store = DedupStore::open_with_table(&config.db.db_file, &config.db.table)
        .await
        .context("Failed to open dedup store")?;
    let records = store
        .list_all()
        .await
        .context("Failed to read stored records")?;
    store.close().await;

    let mut lines = String::new();
    let mut exported = 0;
    for record in &records {
        let json = record
            .entry()
            .map_err(anyhow::Error::from)
            .and_then(|e| entry::encode(&e).map_err(anyhow::Error::from));
        match json {
            Ok(json) => {
                lines.push_str(&json);
                lines.push('\n');
                exported += 1;
            }
            Err(e) => {
                tracing::warn!(id = %record.id, uri = %record.source_uri, error = %e, "Skipping undecodable record");
            }
        }
    }

    tokio::fs::write(out, lines)
        .await
        .with_context(|| format!("Failed to write export file '{}'", out.display()))?;
    Ok(exported)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            tracing::error!(path = %path.display(), "Unable to find config file");
            eprintln!("Error: No config file found at {}", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(out) = &args.export {
        let count = export(&config, out).await?;
        tracing::info!(entries = count, path = %out.display(), "Exported stored entries");
        return Ok(());
    }

    let mut pipeline = IngestionPipeline::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;
    let result = pipeline.run().await;
    pipeline.close().await;

    let report = result.context("Ingest run failed")?;
    for sink in report.sinks.iter().filter(|s| !s.is_ok()) {
        tracing::warn!(sink = %sink.sink, error = ?sink.error, "Sink did not receive this run's entries");
    }
    tracing::info!(
        inserted = report.inserted,
        already_seen = report.already_seen,
        dropped = report.dropped,
        "Run complete"
    );
    Ok(())
}
