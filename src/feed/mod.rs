//! Feed traversal: fetching, parsing and walking paginated Atom feeds.
//!
//! - [`parser`] - converts one Atom page into [`FeedPage`] using `feed-rs`
//! - [`fetcher`] - HTTP retrieval with Basic credentials, retries and size limits
//! - [`walker`] - follows previous-archive links and drives a
//!   [`Persister`](crate::ingest::Persister) in publication order
//!
//! # Example
//!
//! ```ignore
//! use atomimport::feed::{FeedClient, TransportConfig, Walker};
//!
//! let client = FeedClient::new(TransportConfig::default())?;
//! let walker = Walker::with_client("https://data.example.org/datasets.atom", persister, client)?;
//! let report = walker.ingest().await?;
//! ```

mod fetcher;
mod parser;
mod walker;

use chrono::{DateTime, Utc};
use url::Url;

pub use fetcher::{CredentialError, Credentials, FeedClient, FetchError, TransportConfig};
pub use parser::{parse_page, ParseError};
pub use walker::{IngestError, IngestReport, PageFailurePolicy, Walker};

/// Feed-level metadata handed to the persister alongside every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedContext {
    /// Atom `<id>` of the feed, or the root URL when the feed has none.
    pub id: String,
    pub title: String,
    /// Origin (`scheme://host[:port]`) the feed was fetched from.
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

/// A file attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub filename: String,
    /// Declared media type; `None` when the feed did not say.
    pub media_type: Option<String>,
    /// Absolute location of the content.
    pub href: Url,
    pub length: Option<u64>,
    /// Hex-encoded SHA-256 of the content, when the publisher supplies one.
    pub checksum: Option<String>,
}

/// One feed item, i.e. one dataset to ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Stable external id, unchanged across refetches.
    pub id: String,
    pub title: String,
    pub author: Option<Author>,
    pub updated: Option<DateTime<Utc>>,
    pub enclosures: Vec<Enclosure>,
}

/// A parsed feed document.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// URL this page was fetched from.
    pub url: Url,
    pub context: FeedContext,
    /// Entries of this page, oldest first.
    pub entries: Vec<Entry>,
    /// Raw href of the previous (older) page, if the feed links one.
    pub previous: Option<String>,
}
