//! Hot-tier driver rooted at a local directory.

use std::path::{Path, PathBuf};

use super::StorageError;

/// Local disk driver. Each stream occupies `<root>/<sd_hash>/`.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    /// Creates a driver rooted at `root`. The directory is created lazily
    /// on the first `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory a stream's files live in.
    pub fn path(&self, sd_hash: &str) -> PathBuf {
        self.root.join(sd_hash)
    }

    /// Opens a stream for reading.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotFound` - no directory for this hash
    pub async fn open(&self, sd_hash: &str) -> Result<LocalStream, StorageError> {
        let dir = self.path(sd_hash);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(LocalStream { dir }),
            Ok(_) | Err(_) => Err(StorageError::NotFound {
                sd_hash: sd_hash.to_owned(),
            }),
        }
    }

    /// Writes one file of a stream, creating the stream directory as
    /// needed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - directory creation or write failed
    pub async fn put(&self, sd_hash: &str, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let dir = self.path(sd_hash);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), data).await?;
        Ok(())
    }

    /// Removes a stream's directory. Absent streams succeed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - removal failed for a present directory
    pub async fn delete(&self, sd_hash: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.path(sd_hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total size in bytes of a stream's files.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotFound` - no directory for this hash
    /// - `StorageError::Io` - directory walk failed
    pub async fn size(&self, sd_hash: &str) -> Result<u64, StorageError> {
        let stream = self.open(sd_hash).await?;
        let mut total = 0;
        for name in stream.file_names().await? {
            total += tokio::fs::metadata(stream.dir().join(name)).await?.len();
        }
        Ok(total)
    }
}

/// Readable view of one stream's on-disk files.
#[derive(Debug)]
pub struct LocalStream {
    dir: PathBuf,
}

impl LocalStream {
    /// Directory backing this stream.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the regular files in the stream, unordered.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - directory listing failed
    pub async fn file_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    /// Reads one file of the stream.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - read failed
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.dir.join(name)).await?)
    }
}
