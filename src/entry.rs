//! Normalized feed entries and their stored/delivered JSON payload.
//!
//! An [`Entry`] is encoded exactly once per run with [`encode`]; the same
//! bytes go into the dedup store's `raw` column and out to every sink. The
//! encoding is the entry's fields in camelCase plus a `schemaVersion` tag:
//!
//! ```json
//! {"schemaVersion":1,"id":"http://arxiv.org/abs/2401.00001v1","title":"...",
//!  "published":"2024-01-01T00:00:00Z","authors":["A. Author"],"links":[...],
//!  "categories":["cs.AI"],"primaryCategory":"cs.AI"}
//! ```
//!
//! Absent optional fields are omitted rather than written as `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version tag written into every payload.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported payload schema version {0} (expected {PAYLOAD_SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
}

/// One ingested feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Feed-assigned identifier; the dedup key.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,
}

impl Entry {
    /// An entry carrying only its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            published: None,
            updated: None,
            summary: None,
            authors: Vec::new(),
            links: Vec::new(),
            categories: Vec::new(),
            primary_category: None,
            comment: None,
            doi: None,
            journal_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncodedEntry<'a> {
    schema_version: u32,
    #[serde(flatten)]
    entry: &'a Entry,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecodedEntry {
    schema_version: u32,
    #[serde(flatten)]
    entry: Entry,
}

/// Encode an entry as a single-line JSON payload.
pub fn encode(entry: &Entry) -> Result<String, PayloadError> {
    let encoded = EncodedEntry {
        schema_version: PAYLOAD_SCHEMA_VERSION,
        entry,
    };
    Ok(serde_json::to_string(&encoded)?)
}

/// Decode a payload produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Entry, PayloadError> {
    let decoded: DecodedEntry = serde_json::from_slice(bytes)?;
    if decoded.schema_version != PAYLOAD_SCHEMA_VERSION {
        return Err(PayloadError::UnsupportedVersion(decoded.schema_version));
    }
    Ok(decoded.entry)
}
