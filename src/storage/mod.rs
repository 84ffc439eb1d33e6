mod datasets;
mod files;
mod schema;
mod types;
mod users;

pub use files::{hex_digest, FileStore, StoredBlob, INTERNAL_SCHEME};
pub use schema::Database;
pub use types::{
    DatabaseError, Experiment, FileRecord, IngestionRecord, NewDataset, NewExperiment,
    NewFileRecord, User,
};
