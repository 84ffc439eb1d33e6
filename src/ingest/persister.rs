use super::owner::{resolve_owner, OwnerPolicy};
use super::schemas::{self, SchemaError, SchemaType};
use super::{PersistError, Persister};
use crate::feed::{Entry, FeedClient, FeedContext};
use crate::storage::{
    hex_digest, Database, DatabaseError, FileStore, IngestionRecord, NewDataset, NewExperiment,
    NewFileRecord,
};

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Persists entries as datasets in the record store, with enclosure content
/// copied into the local [`FileStore`].
pub struct DatasetPersister {
    db: Database,
    files: FileStore,
    client: FeedClient,
    owner_policy: OwnerPolicy,
    dataset_schema_id: i64,
    datafile_schema_id: i64,
}

impl DatasetPersister {
    /// Validates the schema registry and registers it with `db`.
    ///
    /// `client` downloads enclosures. It sends credentials only to its
    /// `realm_host`, so set that to the feed host when enclosures need them.
    pub async fn new(db: Database, files: FileStore, client: FeedClient) -> Result<Self, PersistError> {
        let mut dataset_schema_id = None;
        let mut datafile_schema_id = None;
        for schema in schemas::registry()? {
            let id = db
                .register_schema(
                    schema.namespace,
                    schema.name,
                    schema.kind.as_str(),
                    schema.subtype,
                    schema.identifier,
                )
                .await?;
            match schema.kind {
                SchemaType::Dataset => dataset_schema_id = Some(id),
                SchemaType::Datafile => datafile_schema_id = Some(id),
            }
        }

        Ok(Self {
            db,
            files,
            client,
            owner_policy: OwnerPolicy::default(),
            dataset_schema_id: dataset_schema_id
                .ok_or(SchemaError::MissingType(SchemaType::Dataset))?,
            datafile_schema_id: datafile_schema_id
                .ok_or(SchemaError::MissingType(SchemaType::Datafile))?,
        })
    }

    pub fn owner_policy(mut self, policy: OwnerPolicy) -> Self {
        self.owner_policy = policy;
        self
    }

    /// Downloads, verifies and stores every enclosure of `entry`.
    ///
    /// Digests of blobs this call created are pushed to `created` as they
    /// are written, so the caller can discard them on failure.
    async fn stage_enclosures(
        &self,
        entry: &Entry,
        created: &mut Vec<String>,
    ) -> Result<Vec<NewFileRecord>, PersistError> {
        let mut records = Vec::with_capacity(entry.enclosures.len());

        for enclosure in &entry.enclosures {
            let content = self
                .client
                .fetch_content(&enclosure.href)
                .await
                .map_err(|source| PersistError::Enclosure {
                    filename: enclosure.filename.clone(),
                    source,
                })?;

            if let Some(expected) = enclosure.checksum.as_deref() {
                let actual = hex_digest(&content);
                if !actual.eq_ignore_ascii_case(expected.trim()) {
                    return Err(PersistError::Checksum {
                        filename: enclosure.filename.clone(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }

            let blob = self.files.put(&content).await?;
            if blob.created {
                created.push(blob.sha256.clone());
            }

            tracing::debug!(
                entry_id = %entry.id,
                filename = %enclosure.filename,
                size = blob.size,
                "Stored enclosure"
            );

            records.push(NewFileRecord {
                filename: enclosure.filename.clone(),
                mimetype: enclosure
                    .media_type
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string()),
                location: FileStore::location(&blob.sha256, &enclosure.filename),
                size: blob.size as i64,
                sha256: blob.sha256,
                schema_id: self.datafile_schema_id,
            });
        }

        Ok(records)
    }

    /// Removes blobs written by a failed call unless a committed record
    /// already points at them.
    async fn discard(&self, created: &[String]) {
        if created.is_empty() {
            return;
        }
        match self.db.remove_unreferenced_blobs(&self.files, created).await {
            Ok(removed) => {
                tracing::debug!(removed = removed, candidates = created.len(), "Discarded orphaned blobs");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not check blob references, keeping blobs");
            }
        }
    }
}

impl Persister for DatasetPersister {
    type Record = IngestionRecord;

    async fn is_new(&self, _feed: &FeedContext, entry: &Entry) -> Result<bool, PersistError> {
        Ok(!self.db.entry_exists(&entry.id).await?)
    }

    async fn process(&self, feed: &FeedContext, entry: &Entry) -> Result<IngestionRecord, PersistError> {
        if !self.is_new(feed, entry).await? {
            return Err(PersistError::DuplicateEntry(entry.id.clone()));
        }

        let owner = resolve_owner(&self.db, entry.author.as_ref(), &self.owner_policy).await?;

        let mut created = Vec::new();
        let files = match self.stage_enclosures(entry, &mut created).await {
            Ok(files) => files,
            Err(e) => {
                self.discard(&created).await;
                return Err(e);
            }
        };

        let experiment = NewExperiment {
            feed_id: feed.id.clone(),
            title: if feed.title.is_empty() {
                feed.id.clone()
            } else {
                feed.title.clone()
            },
            namespace: feed.namespace.clone(),
        };
        let dataset = NewDataset {
            entry_id: entry.id.clone(),
            description: entry.title.clone(),
            schema_id: self.dataset_schema_id,
            updated: entry.updated.map(|t| t.timestamp()),
        };

        match self
            .db
            .create_ingestion(&self.files, &owner, &experiment, &dataset, &files)
            .await
        {
            Ok(record) => {
                tracing::info!(
                    entry_id = %entry.id,
                    dataset_id = record.id,
                    owner = %owner.username,
                    files = record.files.len(),
                    "Ingested entry"
                );
                Ok(record)
            }
            Err(e) => {
                self.discard(&created).await;
                Err(match e {
                    DatabaseError::DuplicateEntry(id) => PersistError::DuplicateEntry(id),
                    other => PersistError::Database(other),
                })
            }
        }
    }
}
