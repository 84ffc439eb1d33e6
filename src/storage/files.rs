use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

/// URL scheme of locations handed out by [`FileStore::location`].
pub const INTERNAL_SCHEME: &str = "tardis";

/// A blob written by [`FileStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
    pub size: u64,
    /// False when identical content was already stored
    pub created: bool,
}

/// Content-addressed file storage.
///
/// Blobs live at `<root>/<first two hex digits>/<sha256>`. Identical content
/// is stored once no matter how many records point at it.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the store, creating `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, sha256: &str) -> PathBuf {
        let prefix = sha256.get(..2).unwrap_or("00");
        self.root.join(prefix).join(sha256)
    }

    /// Stores `content`, returning its digest.
    ///
    /// The blob is written to a temporary file in the target directory,
    /// synced, then renamed into place, so a reader never sees a partial blob.
    pub async fn put(&self, content: &[u8]) -> io::Result<StoredBlob> {
        let sha256 = hex_digest(content);
        let size = content.len() as u64;
        let path = self.blob_path(&sha256);

        if tokio::fs::try_exists(&path).await? {
            return Ok(StoredBlob {
                sha256,
                size,
                created: false,
            });
        }

        let dir = path.parent().unwrap_or(self.root.as_path());
        tokio::fs::create_dir_all(dir).await?;

        let temp_path = dir.join(format!(".{}.{}.tmp", sha256, std::process::id()));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        let written = async {
            file.write_all(content).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        tracing::debug!(sha256 = %sha256, size = size, "Stored blob");
        Ok(StoredBlob {
            sha256,
            size,
            created: true,
        })
    }

    /// Whether a blob with this digest is present.
    pub fn contains(&self, sha256: &str) -> bool {
        self.blob_path(sha256).is_file()
    }

    /// Deletes a blob. Missing blobs are not an error.
    pub async fn remove(&self, sha256: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.blob_path(sha256)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Internal location recorded for a stored file: `tardis://<sha256>/<filename>`.
    pub fn location(sha256: &str, filename: &str) -> String {
        let safe: String = filename
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{INTERNAL_SCHEME}://{sha256}/{safe}")
    }

    /// Maps an internal location back to the blob path, if it is well formed
    /// and the blob exists.
    pub fn resolve(&self, location: &str) -> Option<PathBuf> {
        let rest = location.strip_prefix(INTERNAL_SCHEME)?.strip_prefix("://")?;
        let (sha256, _filename) = rest.split_once('/')?;
        if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let path = self.blob_path(sha256);
        path.is_file().then_some(path)
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn hex_digest(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}
