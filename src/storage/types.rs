use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Database is locked by another process. Please try again later.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A dataset for this entry id already exists (UNIQUE(entry_id))
    #[error("Dataset for entry {0} already exists")]
    DuplicateEntry(String),

    /// A blob a file record points at left the file store before commit
    #[error("Blob {0} is missing from the file store")]
    MissingBlob(String),

    /// Username already taken (UNIQUE(username))
    #[error("User '{0}' already exists")]
    DuplicateUser(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// ============================================================================
// Insert Types
// ============================================================================

/// Container a dataset is filed under, keyed by (feed_id, owner).
#[derive(Debug, Clone)]
pub struct NewExperiment {
    pub feed_id: String,
    pub title: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct NewDataset {
    pub entry_id: String,
    pub description: String,
    pub schema_id: i64,
    /// Entry `updated` timestamp (unix seconds)
    pub updated: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub filename: String,
    pub mimetype: String,
    /// Internal location (`tardis://...`)
    pub location: String,
    pub size: i64,
    pub sha256: String,
    pub schema_id: i64,
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub id: i64,
    pub feed_id: String,
    pub title: String,
    pub namespace: String,
    pub created_by: User,
}

/// A persisted dataset: the record one feed entry becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRecord {
    pub id: i64,
    pub entry_id: String,
    pub description: String,
    pub schema_id: i64,
    pub updated: Option<i64>,
    pub created_at: i64,
    pub experiment: Experiment,
    pub files: Vec<FileRecord>,
}

impl IngestionRecord {
    pub fn file(&self, filename: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.filename == filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub dataset_id: i64,
    pub filename: String,
    pub mimetype: String,
    pub location: String,
    pub size: i64,
    pub sha256: String,
}

/// Row type for dataset queries joined with experiment and owner
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DatasetRow {
    pub id: i64,
    pub entry_id: String,
    pub description: String,
    pub schema_id: i64,
    pub updated: Option<i64>,
    pub created_at: i64,
    pub experiment_id: i64,
    pub feed_id: String,
    pub experiment_title: String,
    pub namespace: String,
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
}

impl DatasetRow {
    pub(crate) fn into_record(self, files: Vec<FileRecord>) -> IngestionRecord {
        IngestionRecord {
            id: self.id,
            entry_id: self.entry_id,
            description: self.description,
            schema_id: self.schema_id,
            updated: self.updated,
            created_at: self.created_at,
            experiment: Experiment {
                id: self.experiment_id,
                feed_id: self.feed_id,
                title: self.experiment_title,
                namespace: self.namespace,
                created_by: User {
                    id: self.user_id,
                    username: self.username,
                    email: self.email,
                },
            },
            files,
        }
    }
}
