//! Persistence decisions for feed entries.
//!
//! The [`Persister`] trait is the seam between the feed walker and the record
//! store: the walker asks whether an entry is new, then hands over new entries
//! in publication order. [`DatasetPersister`] is the store-backed
//! implementation; tests substitute in-memory fakes.

mod owner;
mod persister;
pub mod schemas;

use thiserror::Error;

use crate::feed::{Entry, FeedContext, FetchError};
use crate::storage::DatabaseError;

pub use owner::{resolve_owner, OwnerPolicy};
pub use persister::DatasetPersister;
pub use schemas::{SchemaDescriptor, SchemaError, SchemaType};

/// Decides novelty of entries and materialises new ones.
///
/// `is_new` must be read-only and return the same answer until `process`
/// succeeds for that entry. `process` must be all-or-nothing.
#[allow(async_fn_in_trait)]
pub trait Persister {
    /// What a successful `process` produces.
    type Record;

    async fn is_new(&self, feed: &FeedContext, entry: &Entry) -> Result<bool, PersistError>;

    async fn process(
        &self,
        feed: &FeedContext,
        entry: &Entry,
    ) -> Result<Self::Record, PersistError>;
}

impl<P: Persister> Persister for &P {
    type Record = P::Record;

    async fn is_new(&self, feed: &FeedContext, entry: &Entry) -> Result<bool, PersistError> {
        (**self).is_new(feed, entry).await
    }

    async fn process(
        &self,
        feed: &FeedContext,
        entry: &Entry,
    ) -> Result<Self::Record, PersistError> {
        (**self).process(feed, entry).await
    }
}

/// Failures while ingesting a single entry.
///
/// Every variant leaves the entry unseen: nothing it created survives.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The entry id is already ingested
    #[error("Entry {0} has already been ingested")]
    DuplicateEntry(String),

    /// No user matches the entry's author and no fallback owner is configured
    #[error("No user matches author '{name}'{}", email.as_deref().map(|e| format!(" <{e}>")).unwrap_or_default())]
    UnresolvedOwner { name: String, email: Option<String> },

    /// A fallback owner is configured but does not exist
    #[error("Fallback owner '{0}' does not exist")]
    MissingFallbackOwner(String),

    /// Enclosure content could not be retrieved
    #[error("Failed to fetch enclosure '{filename}': {source}")]
    Enclosure {
        filename: String,
        #[source]
        source: FetchError,
    },

    /// Enclosure content does not match the checksum the feed supplied
    #[error("Checksum mismatch for '{filename}': expected {expected}, got {actual}")]
    Checksum {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Local file store failure
    #[error("File store error: {0}")]
    Storage(#[from] std::io::Error),

    /// Record store failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Schema registry unusable
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        PersistError::Database(DatabaseError::from_sqlx(err))
    }
}
