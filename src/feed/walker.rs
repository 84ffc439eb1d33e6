use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::fetcher::{CredentialError, FeedClient, FetchError, TransportConfig};
use super::{Entry, FeedContext, FeedPage};
use crate::ingest::{PersistError, Persister};
use crate::util::{resolve_link, validate_feed_url, UrlValidationError};

const DEFAULT_MAX_PAGES: usize = 1000;

/// What to do when a linked previous page cannot be fetched or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFailurePolicy {
    /// Fail the whole walk; nothing is processed.
    #[default]
    Abort,
    /// Keep the pages fetched so far and stop paginating.
    Truncate,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Failed to ingest entry {entry_id}: {source}")]
    Persist {
        entry_id: String,
        #[source]
        source: PersistError,
    },
}

impl From<FetchError> for IngestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Credential(e) => IngestError::Credential(e),
            other => IngestError::Fetch(other),
        }
    }
}

/// Outcome of one [`Walker::ingest`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Feed pages fetched, root included
    pub pages: usize,
    /// Distinct entries found across all pages
    pub discovered: usize,
    /// Entries handed to `Persister::process`
    pub processed: usize,
}

/// Walks a paginated feed and feeds new entries to a [`Persister`] in
/// publication order.
///
/// Feeds are assumed append-only: once the backward scan meets a known entry,
/// everything older is taken as already ingested and is not looked at again.
pub struct Walker<P> {
    url: Url,
    persister: P,
    client: FeedClient,
    page_failure: PageFailurePolicy,
    max_pages: usize,
}

impl<P: Persister> Walker<P> {
    /// Creates a walker using an unauthenticated default transport.
    pub fn new(feed_url: &str, persister: P) -> Result<Self, IngestError> {
        let client = FeedClient::new(TransportConfig::default())?;
        Self::with_client(feed_url, persister, client)
    }

    /// Creates a walker using `client`, e.g. one carrying Basic credentials.
    ///
    /// Credentials without an explicit realm are scoped to the feed's host.
    pub fn with_client(
        feed_url: &str,
        persister: P,
        mut client: FeedClient,
    ) -> Result<Self, IngestError> {
        let url = validate_feed_url(feed_url)?;
        client.bind_realm(url.host_str());
        Ok(Self {
            url,
            persister,
            client,
            page_failure: PageFailurePolicy::default(),
            max_pages: DEFAULT_MAX_PAGES,
        })
    }

    pub fn page_failure(mut self, policy: PageFailurePolicy) -> Self {
        self.page_failure = policy;
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetches the whole backlog and processes every entry newer than the
    /// newest already-ingested one, oldest first.
    ///
    /// Stops at the first entry that fails to process; entries processed
    /// before it stay committed and it is retried on the next run.
    pub async fn ingest(&self) -> Result<IngestReport, IngestError> {
        let (feed, entries, pages) = self.collect_entries().await?;

        let cutoff = self.find_cutoff(&feed, &entries).await?;
        let new_entries = &entries[cutoff..];

        tracing::info!(
            feed = %self.url,
            pages = pages,
            discovered = entries.len(),
            new = new_entries.len(),
            "Feed backlog assembled"
        );

        let mut processed = 0;
        for entry in new_entries {
            self.persister
                .process(&feed, entry)
                .await
                .map_err(|source| IngestError::Persist {
                    entry_id: entry.id.clone(),
                    source,
                })?;
            processed += 1;
            tracing::debug!(entry_id = %entry.id, title = %entry.title, "Processed entry");
        }

        Ok(IngestReport {
            pages,
            discovered: entries.len(),
            processed,
        })
    }

    /// Fetches the root page and every previous page it links to.
    ///
    /// Returns the root's feed context, all entries oldest-first and the
    /// number of pages fetched. Entries repeated across pages keep their
    /// oldest position.
    pub async fn collect_entries(&self) -> Result<(FeedContext, Vec<Entry>, usize), IngestError> {
        let trusted_host = self.url.host_str();
        let root = self.client.fetch_page(&self.url, trusted_host).await?;
        let feed = root.context.clone();

        let mut visited: HashSet<Url> = HashSet::from([self.url.clone()]);
        // Newest page first
        let mut pages: Vec<FeedPage> = vec![root];

        loop {
            let current = &pages[pages.len() - 1];
            let Some(href) = current.previous.as_deref() else {
                break;
            };

            let next = match resolve_link(&current.url, href, trusted_host) {
                Ok(url) => url,
                Err(e) => {
                    self.stop_paginating(FetchError::InvalidLink {
                        href: href.to_string(),
                        reason: e.to_string(),
                    })?;
                    break;
                }
            };

            if !visited.insert(next.clone()) {
                tracing::warn!(page = %next, "Previous-page link loops back, stopping pagination");
                break;
            }

            if pages.len() >= self.max_pages {
                return Err(FetchError::TooManyPages(self.max_pages).into());
            }

            match self.client.fetch_page(&next, trusted_host).await {
                Ok(page) => pages.push(page),
                Err(FetchError::Credential(e)) => return Err(e.into()),
                Err(e) => {
                    self.stop_paginating(e)?;
                    break;
                }
            }
        }

        let page_count = pages.len();
        let mut seen = HashSet::new();
        let entries: Vec<Entry> = pages
            .into_iter()
            .rev()
            .flat_map(|page| page.entries)
            .filter(|entry| seen.insert(entry.id.clone()))
            .collect();

        Ok((feed, entries, page_count))
    }

    /// Applies the page failure policy. `Ok` means keep the pages fetched so far.
    fn stop_paginating(&self, err: FetchError) -> Result<(), IngestError> {
        match self.page_failure {
            PageFailurePolicy::Abort => Err(err.into()),
            PageFailurePolicy::Truncate => {
                tracing::warn!(
                    feed = %self.url,
                    error = %err,
                    "Previous page unavailable, truncating backlog"
                );
                Ok(())
            }
        }
    }

    /// Index of the oldest entry in the newest run of new entries.
    async fn find_cutoff(&self, feed: &FeedContext, entries: &[Entry]) -> Result<usize, IngestError> {
        let mut cutoff = entries.len();
        for (idx, entry) in entries.iter().enumerate().rev() {
            let is_new = self
                .persister
                .is_new(feed, entry)
                .await
                .map_err(|source| IngestError::Persist {
                    entry_id: entry.id.clone(),
                    source,
                })?;
            if !is_new {
                tracing::debug!(entry_id = %entry.id, "Reached already ingested entry");
                break;
            }
            cutoff = idx;
        }
        Ok(cutoff)
    }
}
