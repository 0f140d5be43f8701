use uuid::Uuid;

use super::schema::DedupStore;
use super::types::{StorageError, StoredRecord};

impl DedupStore {
    // ========================================================================
    // Record Operations
    // ========================================================================

    /// True iff a record with this dedup key has been committed.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> =
            sqlx::query_as(&format!("SELECT 1 FROM {} WHERE uri = ? LIMIT 1", self.table))
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::from_sqlx(e, None))?;
        Ok(row.is_some())
    }

    /// Commit one record and return its generated primary key.
    ///
    /// Never overwrites: inserting a key that is already present fails with
    /// `StorageError::DuplicateKey`, leaving the stored row untouched.
    pub async fn insert(
        &self,
        key: &str,
        timestamp: &str,
        payload: &[u8],
    ) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(&format!(
            "INSERT INTO {} (id, ts, uri, raw) VALUES (?, ?, ?, ?)",
            self.table
        ))
        .bind(&id)
        .bind(timestamp)
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::from_sqlx(e, Some(key)))?;

        tracing::debug!(key = %key, id = %id, "Committed record");
        Ok(id)
    }

    /// Every committed record, oldest insertion first.
    pub async fn list_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        sqlx::query_as::<_, StoredRecord>(&format!(
            "SELECT id, ts AS timestamp, uri AS source_uri, raw AS payload FROM {} ORDER BY ts, id",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::from_sqlx(e, None))
    }

    /// Number of committed records.
    pub async fn count(&self) -> Result<i64, StorageError> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::from_sqlx(e, None))?;
        Ok(row.0)
    }
}
