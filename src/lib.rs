//! Exactly-once ingestion of scientific datasets published as paginated Atom
//! feeds.
//!
//! A [`feed::Walker`] assembles a feed's full backlog by following
//! previous-archive links, finds the entries not yet ingested and hands them,
//! oldest first, to a [`ingest::Persister`]. [`ingest::DatasetPersister`]
//! turns each entry into a dataset in the SQLite record store, with its
//! enclosures copied into a local content-addressed [`storage::FileStore`].

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
