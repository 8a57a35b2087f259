//! Byte storage for transcoded streams.
//!
//! A stream is a directory of HLS files keyed by its sd-hash. The local
//! driver holds the hot tier on disk; the remote driver holds the warm tier
//! in an S3-compatible object store. Both only move bytes; which tier a
//! stream lives on is tracked by the library.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use bytes::Bytes;

pub use local::{LocalDriver, LocalStream};
pub use remote::S3Driver;

/// Errors that occur while moving stream bytes between tiers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Stream directory or object does not exist.
    #[error("stream {sd_hash} not found")]
    NotFound {
        /// Hash of the missing stream.
        sd_hash: String,
    },

    /// Filesystem operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store operation failed.
    #[error("remote storage error: {0}")]
    Remote(#[from] object_store::Error),
}

/// Warm-tier driver over an object store.
///
/// Keys are `<sd_hash>/<file name>`. Deleting an absent stream is not an
/// error; tier movement must be idempotent.
#[async_trait]
pub trait RemoteDriver: Send + Sync {
    /// Uploads one file of a stream.
    ///
    /// # Errors
    ///
    /// - `StorageError::Remote` - object store rejected the write
    async fn put(&self, sd_hash: &str, name: &str, data: Bytes) -> Result<(), StorageError>;

    /// Downloads one file of a stream.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotFound` - no such object
    /// - `StorageError::Remote` - object store failed
    async fn get(&self, sd_hash: &str, name: &str) -> Result<Bytes, StorageError>;

    /// Deletes every object of a stream. Absent streams succeed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Remote` - object store failed mid-delete
    async fn delete(&self, sd_hash: &str) -> Result<(), StorageError>;

    /// Public URL under which the stream's playlist is reachable.
    fn url(&self, sd_hash: &str) -> String;
}
