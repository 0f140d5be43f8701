//! Raw scan of feed items for the fields `feed-rs` does not expose.
//!
//! `feed-rs` drops foreign (non-Atom, non-RSS) child elements and synthesizes an
//! id for items that lack one. Both matter here: arXiv carries its metadata in
//! `arxiv:*` extension elements, and an item without a source-assigned id must
//! be dropped rather than keyed on a generated hash. This module walks the
//! document once with `quick-xml` and returns, per item and in document order,
//! the literal identifier and the recognized extension values.
//!
//! An RSS `<item>` without a `<guid>` falls back to its `<link>` text as the
//! identifier. Atom entries have no such fallback.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Source-specific metadata found among an item's direct children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    pub primary_category: Option<String>,
    pub comment: Option<String>,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
}

/// Everything the scan learned about one `<entry>` / `<item>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMarkup {
    /// Trimmed `<id>` (Atom) or `<guid>` (RSS) text, else the RSS `<link>`;
    /// `None` when absent or blank.
    pub id: Option<String>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Id,
    Comment,
    Doi,
    JournalRef,
    Link,
}

/// What a direct child element of an item maps to.
enum ChildTag {
    Text(TextField),
    PrimaryCategory,
    /// Recognized; it has no destination field.
    Affiliation,
    Other,
}

fn child_tag(local_name: &[u8]) -> ChildTag {
    match local_name {
        b"id" | b"guid" => ChildTag::Text(TextField::Id),
        b"comment" => ChildTag::Text(TextField::Comment),
        b"doi" => ChildTag::Text(TextField::Doi),
        b"journal_ref" => ChildTag::Text(TextField::JournalRef),
        b"link" => ChildTag::Text(TextField::Link),
        b"primary_category" => ChildTag::PrimaryCategory,
        b"affiliation" => ChildTag::Affiliation,
        _ => ChildTag::Other,
    }
}

fn is_item(local_name: &[u8]) -> bool {
    matches!(local_name, b"entry" | b"item")
}

/// Per-item scan state.
#[derive(Default)]
struct ItemState {
    markup: ItemMarkup,
    /// RSS `<item>` rather than Atom `<entry>`.
    rss: bool,
    link: Option<String>,
}

impl ItemState {
    fn new(local_name: &[u8]) -> Self {
        Self {
            rss: local_name == b"item",
            ..Self::default()
        }
    }

    fn finish(self) -> ItemMarkup {
        let mut markup = self.markup;
        if markup.id.is_none() && self.rss {
            markup.id = self.link;
        }
        markup
    }
}

/// Text being collected for a field, with the depth of its element.
struct Capture {
    field: TextField,
    depth: usize,
    text: String,
}

/// Scans `bytes` and returns one [`ItemMarkup`] per feed item, in order.
///
/// # Errors
///
/// Returns the XML error message if the document is not well-formed.
pub fn scan_items(bytes: &[u8]) -> Result<Vec<ItemMarkup>, String> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; unknown
    // entities surface as unescape errors and reject the document.
    // Text is not trimmed per event: an element may interleave text and CDATA,
    // and only the joined value is trimmed.
    let mut reader = Reader::from_reader(bytes);

    let mut items = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut item_depth: Option<usize> = None;
    let mut current = ItemState::default();
    let mut capture: Option<Capture> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                let local = e.local_name();
                match item_depth {
                    None if is_item(local.as_ref()) => {
                        item_depth = Some(depth);
                        current = ItemState::new(local.as_ref());
                    }
                    Some(d) if depth == d + 1 => match child_tag(local.as_ref()) {
                        ChildTag::Text(field) => {
                            capture = Some(Capture {
                                field,
                                depth,
                                text: String::new(),
                            });
                        }
                        ChildTag::PrimaryCategory => {
                            current.markup.extensions.primary_category = term_attribute(&e, &reader)?;
                        }
                        ChildTag::Affiliation | ChildTag::Other => {}
                    },
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let local = e.local_name();
                match item_depth {
                    None if is_item(local.as_ref()) => items.push(ItemMarkup::default()),
                    Some(d) if depth == d => {
                        if let ChildTag::PrimaryCategory = child_tag(local.as_ref()) {
                            current.markup.extensions.primary_category = term_attribute(&e, &reader)?;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(c) = capture.as_mut() {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    c.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(c) = capture.take() {
                        store_text(&mut current, c.field, c.text);
                    }
                }
                if item_depth == Some(depth) {
                    items.push(std::mem::take(&mut current).finish());
                    item_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.error_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if item_depth.is_some() {
        return Err("Unexpected end of document inside a feed item".to_string());
    }

    Ok(items)
}

fn store_text(item: &mut ItemState, field: TextField, text: String) {
    let value = non_blank(text);
    match field {
        TextField::Id => item.markup.id = value,
        TextField::Comment => item.markup.extensions.comment = value,
        TextField::Doi => item.markup.extensions.doi = value,
        TextField::JournalRef => item.markup.extensions.journal_ref = value,
        TextField::Link => item.link = value,
    }
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == text.len() {
        Some(text)
    } else {
        Some(trimmed.to_string())
    }
}

fn term_attribute(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<String>, String> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed primary_category attribute");
                continue;
            }
        };
        if attr.key.local_name().as_ref() == b"term" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| e.to_string())?;
            return Ok(non_blank(value.into_owned()));
        }
    }
    tracing::debug!("primary_category element without a term attribute");
    Ok(None)
}
