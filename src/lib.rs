//! Batch ingestion of the arXiv Atom API.
//!
//! Each run fetches one page of the feed, normalizes its entries, records
//! newly seen ones in a SQLite dedup store, and fans the new entries out to
//! an append-only JSON-lines file and/or an AMQP queue.

pub mod config;
pub mod entry;
pub mod feed;
pub mod pipeline;
pub mod sink;
pub mod storage;
