use feed_rs::parser;
use thiserror::Error;

use super::extensions::{scan_items, ItemMarkup};
use crate::entry::{Entry, Link};

#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not a well-formed RSS/Atom document
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

/// Result of normalizing one feed document.
#[derive(Debug, Clone)]
pub struct NormalizedFeed {
    /// Entries in source order.
    pub entries: Vec<Entry>,
    /// Items dropped because they carried no identifier.
    pub dropped: usize,
}

/// Parses an RSS/Atom payload into normalized entries.
///
/// Standard fields come from `feed-rs`; identifiers and arXiv extension
/// elements come from a parallel raw scan (see [`super::extensions`]). Both
/// passes see the same items in the same order, so they are paired by position.
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] if either pass rejects the document, or
/// if they disagree on the number of items.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedFeed, ParseError> {
    let feed = parser::parse(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let markup = scan_items(bytes).map_err(ParseError::Malformed)?;

    if feed.entries.len() != markup.len() {
        return Err(ParseError::Malformed(format!(
            "Parsed {} entries but found {} item elements",
            feed.entries.len(),
            markup.len()
        )));
    }

    let mut entries = Vec::with_capacity(markup.len());
    let mut dropped = 0;

    for (position, (item, raw)) in feed.entries.into_iter().zip(markup).enumerate() {
        match to_entry(item, raw) {
            Some(entry) => entries.push(entry),
            None => {
                dropped += 1;
                tracing::warn!(position = position, "Dropping feed item without an id");
            }
        }
    }

    Ok(NormalizedFeed { entries, dropped })
}

fn to_entry(item: feed_rs::model::Entry, markup: ItemMarkup) -> Option<Entry> {
    let id = markup.id?;
    let ext = markup.extensions;

    let links = item
        .links
        .into_iter()
        .map(|l| Link {
            title: l.title,
            href: non_empty(l.href),
            rel: l.rel,
            media_type: l.media_type,
        })
        .collect();

    Some(Entry {
        id,
        title: item.title.map(|t| t.content),
        published: item.published,
        updated: item.updated,
        summary: item.summary.map(|s| s.content),
        authors: item.authors.into_iter().map(|p| p.name).collect(),
        links,
        categories: item.categories.into_iter().map(|c| c.term).collect(),
        primary_category: ext.primary_category,
        comment: ext.comment,
        doi: ext.doi,
        journal_ref: ext.journal_ref,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
