use std::collections::HashMap;

use sqlx::QueryBuilder;

use super::files::FileStore;
use super::schema::Database;
use super::types::{
    is_unique_violation, DatabaseError, DatasetRow, FileRecord, IngestionRecord, NewDataset,
    NewExperiment, NewFileRecord, User,
};

const DATASET_SELECT: &str = r#"
    SELECT
        d.id, d.entry_id, d.description, d.schema_id, d.updated, d.created_at,
        e.id AS experiment_id, e.feed_id, e.title AS experiment_title, e.namespace,
        u.id AS user_id, u.username, u.email
    FROM datasets d
    JOIN experiments e ON e.id = d.experiment_id
    JOIN users u ON u.id = e.created_by
"#;

impl Database {
    // ========================================================================
    // Dataset Operations
    // ========================================================================

    /// Whether a dataset already exists for this external entry id.
    pub async fn entry_exists(&self, entry_id: &str) -> Result<bool, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM datasets WHERE entry_id = ?)")
            .bind(entry_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 != 0)
    }

    /// Create a dataset with its files in a single transaction.
    ///
    /// The experiment for (`experiment.feed_id`, `owner`) is reused when it
    /// exists and created otherwise. Every file's blob must still be in
    /// `store` once the write lock is held. If any step fails the transaction
    /// is rolled back and nothing is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::DuplicateEntry`] when another dataset already
    /// carries `dataset.entry_id`, including one committed by a concurrent
    /// ingestion run after the caller's own existence check.
    /// Returns [`DatabaseError::MissingBlob`] when a concurrent run discarded
    /// a blob this dataset points at.
    pub async fn create_ingestion(
        &self,
        store: &FileStore,
        owner: &User,
        experiment: &NewExperiment,
        dataset: &NewDataset,
        files: &[NewFileRecord],
    ) -> Result<IngestionRecord, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        // Get-or-create the experiment; the no-op UPDATE makes RETURNING fire
        // for an existing row as well.
        let (experiment_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO experiments (feed_id, title, namespace, created_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, created_by) DO UPDATE SET feed_id = excluded.feed_id
            RETURNING id
        "#,
        )
        .bind(&experiment.feed_id)
        .bind(&experiment.title)
        .bind(&experiment.namespace)
        .bind(owner.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let inserted: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO datasets (experiment_id, entry_id, description, schema_id, updated, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(experiment_id)
        .bind(&dataset.entry_id)
        .bind(&dataset.description)
        .bind(dataset.schema_id)
        .bind(dataset.updated)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let dataset_id = match inserted {
            Ok((id,)) => id,
            Err(e) if is_unique_violation(&e) => {
                return Err(DatabaseError::DuplicateEntry(dataset.entry_id.clone()));
            }
            Err(e) => return Err(DatabaseError::from_sqlx(e)),
        };

        if !files.is_empty() {
            // 7 columns * 100 rows stays well under SQLite's parameter limit
            const BATCH_SIZE: usize = 100;
            for chunk in files.chunks(BATCH_SIZE) {
                let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                    "INSERT INTO dataset_files (dataset_id, filename, mimetype, location, size, sha256, schema_id) ",
                );
                builder.push_values(chunk, |mut b, file| {
                    b.push_bind(dataset_id)
                        .push_bind(&file.filename)
                        .push_bind(&file.mimetype)
                        .push_bind(&file.location)
                        .push_bind(file.size)
                        .push_bind(&file.sha256)
                        .push_bind(file.schema_id);
                });
                builder.build().execute(&mut *tx).await?;
            }
        }

        // The inserts above hold the write lock, so no blob can be discarded
        // between this check and the commit.
        if let Some(missing) = files.iter().find(|f| !store.contains(&f.sha256)) {
            return Err(DatabaseError::MissingBlob(missing.sha256.clone()));
        }

        let file_rows = sqlx::query_as::<_, FileRecord>(
            "SELECT id, dataset_id, filename, mimetype, location, size, sha256
             FROM dataset_files WHERE dataset_id = ? ORDER BY id",
        )
        .bind(dataset_id)
        .fetch_all(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, DatasetRow>(&format!("{DATASET_SELECT} WHERE d.id = ?"))
            .bind(dataset_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            dataset_id = dataset_id,
            entry_id = %dataset.entry_id,
            experiment_id = experiment_id,
            files = file_rows.len(),
            "Dataset committed"
        );

        Ok(row.into_record(file_rows))
    }

    /// Fetch the dataset created for `entry_id`, with its files.
    pub async fn get_ingestion(&self, entry_id: &str) -> Result<Option<IngestionRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, DatasetRow>(&format!("{DATASET_SELECT} WHERE d.entry_id = ?"))
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT id, dataset_id, filename, mimetype, location, size, sha256
             FROM dataset_files WHERE dataset_id = ? ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_record(files)))
    }

    /// All datasets in creation order, with their files.
    pub async fn list_datasets(&self) -> Result<Vec<IngestionRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, DatasetRow>(&format!("{DATASET_SELECT} ORDER BY d.id"))
            .fetch_all(&self.pool)
            .await?;

        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT id, dataset_id, filename, mimetype, location, size, sha256
             FROM dataset_files ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_dataset: HashMap<i64, Vec<FileRecord>> = HashMap::new();
        for file in files {
            by_dataset.entry(file.dataset_id).or_default().push(file);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let files = by_dataset.remove(&row.id).unwrap_or_default();
                row.into_record(files)
            })
            .collect())
    }

    pub async fn count_datasets(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Deletes the `candidates` no file record points at and returns how
    /// many were removed.
    ///
    /// Runs under `BEGIN IMMEDIATE`, so a concurrent [`create_ingestion`]
    /// either committed before the check or sees the blob gone before its
    /// own commit.
    ///
    /// [`create_ingestion`]: Database::create_ingestion
    pub async fn remove_unreferenced_blobs(
        &self,
        store: &FileStore,
        candidates: &[String],
    ) -> Result<usize, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let swept: Result<usize, sqlx::Error> = async {
            let mut removed = 0;
            for sha256 in candidates {
                let (referenced,): (i64,) =
                    sqlx::query_as("SELECT EXISTS(SELECT 1 FROM dataset_files WHERE sha256 = ?)")
                        .bind(sha256)
                        .fetch_one(&mut *conn)
                        .await?;
                if referenced != 0 {
                    continue;
                }
                match store.remove(sha256).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(sha256 = %sha256, error = %e, "Failed to remove orphaned blob");
                    }
                }
            }
            Ok(removed)
        }
        .await;

        let end = if swept.is_ok() { "COMMIT" } else { "ROLLBACK" };
        sqlx::query(end).execute(&mut *conn).await?;
        Ok(swept?)
    }
}
