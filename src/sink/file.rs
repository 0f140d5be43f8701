use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{Sink, SinkError};

/// Appends one encoded entry per line to a UTF-8 text file.
///
/// The file and its parent directories are created on first write; existing
/// content is never truncated.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn err(&self, action: &str, e: std::io::Error) -> SinkError {
        SinkError::unavailable(
            "file",
            format!("{} '{}': {}", action, self.path.display(), e),
        )
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&mut self, batch: &[String]) -> Result<usize, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.err("Failed to create directory for", e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.err("Failed to open", e))?;

        let mut buf = String::with_capacity(batch.iter().map(|line| line.len() + 1).sum());
        for line in batch {
            buf.push_str(line);
            buf.push('\n');
        }

        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| self.err("Failed to write", e))?;
        file.flush()
            .await
            .map_err(|e| self.err("Failed to flush", e))?;

        tracing::debug!(path = %self.path.display(), lines = batch.len(), "Appended entries");
        Ok(batch.len())
    }
}
