use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

/// Table used when the configuration does not name one.
pub const DEFAULT_TABLE: &str = "arxiv_raw";

// ============================================================================
// DedupStore
// ============================================================================

/// Persistent record of every entry ever accepted, keyed by entry id.
///
/// Backed by a single SQLite table with a unique index on the dedup key. The
/// pool holds exactly one connection: a run is single-writer, and a private
/// `:memory:` database only exists on the connection that created it.
#[derive(Clone)]
pub struct DedupStore {
    pub(crate) pool: SqlitePool,
    pub(crate) table: String,
}

impl DedupStore {
    /// Open (or create) the store at `path` using [`DEFAULT_TABLE`].
    ///
    /// Pass `":memory:"` for a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the file or its parent directory
    /// cannot be created, the database cannot be opened, or the schema cannot be
    /// applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_table(path, DEFAULT_TABLE).await
    }

    /// Open (or create) the store at `path`, keeping records in `table`.
    pub async fn open_with_table(
        path: impl AsRef<Path>,
        table: &str,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !is_valid_table_name(table) {
            return Err(StorageError::Unavailable(format!(
                "Invalid table name '{}'",
                table
            )));
        }

        let options = if path == Path::new(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StorageError::Unavailable(e.to_string()))?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        // busy_timeout=5000: wait up to 5 seconds for a lock held by another
        // process (e.g. an overlapping scheduled run) before failing.
        let options = options.pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!(
                    "Failed to open '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), table = %store.table, "Opened dedup store");
        Ok(store)
    }

    /// Create the records table and its unique dedup-key index.
    ///
    /// Both statements use `IF NOT EXISTS`, so re-running on an existing store
    /// is a no-op. Tables created by older tooling without the uniqueness
    /// constraint gain it here.
    async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                uri TEXT NOT NULL,
                raw BLOB NOT NULL
            )
        "#,
            table = self.table
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Schema migration failed: {}", e)))?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_uri_unique ON {table}(uri)",
            table = self.table
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Schema migration failed: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Release the underlying connection. Safe to call more than once; any
    /// later query fails with `StorageError::Unavailable`.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::debug!(table = %self.table, "Closed dedup store");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// The table name is interpolated into SQL, so only plain identifiers pass.
fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
