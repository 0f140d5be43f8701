//! Feed retrieval and normalization.
//!
//! - [`query`] - builds the arXiv query URL from the configured categories
//! - [`fetcher`] - HTTP GET with a retry policy that only repeats transient transport failures
//! - [`parser`] - turns the Atom/RSS payload into [`crate::entry::Entry`] values
//! - [`extensions`] - raw `quick-xml` scan for ids and arXiv extension elements

pub mod extensions;
pub mod fetcher;
pub mod parser;
pub mod query;

pub use fetcher::{FailureKind, FetchError, FetcherSettings, RetryingFetcher};
pub use parser::{normalize, NormalizedFeed, ParseError};
pub use query::{build_category_query, FeedQuery};
