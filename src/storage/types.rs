use thiserror::Error;

use crate::entry::{self, Entry, PayloadError};

// ============================================================================
// Error Types
// ============================================================================

/// Dedup store errors.
///
/// `DuplicateKey` is a per-entry condition the pipeline recovers from;
/// `Unavailable` means the store itself cannot be used and ends the run.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be opened, or a query against it failed
    #[error("Dedup store unavailable: {0}")]
    Unavailable(String),

    /// A record with this dedup key was already committed
    #[error("Duplicate dedup key: {0}")]
    DuplicateKey(String),
}

impl StorageError {
    /// Maps a sqlx error, treating uniqueness violations on `key` as duplicates.
    pub(crate) fn from_sqlx(err: sqlx::Error, key: Option<&str>) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StorageError::DuplicateKey(key.unwrap_or_default().to_string());
            }
        }
        StorageError::Unavailable(err.to_string())
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One committed row of the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredRecord {
    /// Random UUIDv4 primary key.
    pub id: String,
    /// Insertion time, ISO-8601 UTC.
    pub timestamp: String,
    /// Dedup key; equal to the entry id.
    pub source_uri: String,
    /// Encoded entry as produced by [`crate::entry::encode`].
    pub payload: Vec<u8>,
}

impl StoredRecord {
    /// Decodes the payload back into the entry it was stored from.
    pub fn entry(&self) -> Result<Entry, PayloadError> {
        entry::decode(&self.payload)
    }
}
