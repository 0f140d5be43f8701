mod records;
mod schema;
mod types;

pub use schema::{DedupStore, DEFAULT_TABLE};
pub use types::{StorageError, StoredRecord};
