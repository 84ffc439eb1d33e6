use chrono::{DateTime, Utc};
use feed_rs::model;
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

use super::{Author, Enclosure, Entry, FeedContext, FeedPage};
use crate::util::{filename_from_url, resolve_link, UrlValidationError};

/// Link relations that point at the previous (older) page of a feed.
///
/// `prev-archive` is the RFC 5005 archived-feed relation. `next` is the
/// paged-feed relation, which in that scheme walks towards older entries.
const PREVIOUS_PAGE_RELS: [&str; 2] = ["prev-archive", "next"];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid feed document: {0}")]
    Document(#[from] parser::ParseFeedError),
    #[error("Entry {entry_id} has an unusable enclosure link '{href}': {source}")]
    Enclosure {
        entry_id: String,
        href: String,
        #[source]
        source: UrlValidationError,
    },
}

/// Parses one feed page fetched from `page_url`.
///
/// Entries come back oldest-first regardless of how the publisher ordered
/// them. Enclosure hrefs are resolved against `page_url`; links leaving
/// `trusted_host` must point at public addresses.
pub fn parse_page(
    bytes: &[u8],
    page_url: &Url,
    trusted_host: Option<&str>,
) -> Result<FeedPage, ParseError> {
    // Missing ids stay empty so the stable fallbacks below apply instead of
    // a fresh random id on every fetch.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;

    let context = FeedContext {
        id: non_empty(&feed.id).unwrap_or_else(|| page_url.to_string()),
        title: feed
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default(),
        namespace: page_url.origin().ascii_serialization(),
    };

    let previous = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some(PREVIOUS_PAGE_RELS[0]))
        .or_else(|| {
            feed.links
                .iter()
                .find(|l| l.rel.as_deref() == Some(PREVIOUS_PAGE_RELS[1]))
        })
        .map(|l| l.href.clone());

    let feed_author = feed.authors.first();
    let mut entries = feed
        .entries
        .into_iter()
        .map(|entry| convert_entry(entry, feed_author, page_url, trusted_host))
        .collect::<Result<Vec<_>, _>>()?;

    normalize_order(&mut entries);

    Ok(FeedPage {
        url: page_url.clone(),
        context,
        entries,
        previous,
    })
}

fn convert_entry(
    entry: model::Entry,
    feed_author: Option<&model::Person>,
    page_url: &Url,
    trusted_host: Option<&str>,
) -> Result<Entry, ParseError> {
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let updated = entry.updated.or(entry.published);
    let alternate = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .map(|l| l.href.as_str());

    let id = generate_entry_id(non_empty(&entry.id).as_deref(), alternate, &title, updated);

    // Atom entries inherit the feed-level author when they carry none
    let author = entry
        .authors
        .first()
        .or(feed_author)
        .map(|person| Author {
            name: person.name.trim().to_string(),
            email: person
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        });

    let mut enclosures = Vec::new();
    for link in entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
    {
        let href = resolve_link(page_url, &link.href, trusted_host).map_err(|source| {
            ParseError::Enclosure {
                entry_id: id.clone(),
                href: link.href.clone(),
                source,
            }
        })?;

        let filename = link
            .title
            .as_deref()
            .and_then(non_empty)
            .or_else(|| filename_from_url(&href))
            .unwrap_or_else(|| format!("enclosure-{}", enclosures.len() + 1));

        enclosures.push(Enclosure {
            filename,
            media_type: link.media_type.as_deref().and_then(non_empty),
            href,
            length: link.length,
            checksum: None,
        });
    }

    Ok(Entry {
        id,
        title,
        author,
        updated,
        enclosures,
    })
}

/// Puts a page's entries oldest-first.
///
/// Publishers disagree on whether a page lists newest or oldest first, so the
/// page is reversed when its first dated entry is newer than its last one.
/// Relative order is otherwise preserved.
fn normalize_order(entries: &mut [Entry]) {
    let first = entries.iter().find_map(|e| e.updated);
    let last = entries.iter().rev().find_map(|e| e.updated);
    if let (Some(first), Some(last)) = (first, last) {
        if first > last {
            entries.reverse();
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn generate_entry_id(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    updated: Option<DateTime<Utc>>,
) -> String {
    if let Some(id) = existing {
        return id.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        updated.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
