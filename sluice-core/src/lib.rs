//! Sluice core - popularity-driven video transcoding and caching
//!
//! This crate provides the machinery behind the sluice HLS service:
//! request popularity counting, the transcoding worker fleet, the
//! two-tier video library with its admission and eviction loops, and the
//! storage drivers underneath them.

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![warn(clippy::too_many_lines)]

pub mod cleaner;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod encoder;
pub mod library;
pub mod pipeline;
pub mod popularity;
pub mod shutdown;
pub mod storage;
pub mod sweeper;
pub mod taskqueue;
pub mod tracing_setup;
pub mod uploader;

// Re-export main types for convenient access
pub use cleaner::CleanerConfig;
pub use config::{parse_size, ConfigError, SluiceConfig};
pub use db::Db;
pub use dispatcher::{DispatchError, Dispatcher, Task, Workload};
pub use encoder::{Encoder, EncodingError, FfmpegEncoder, FfmpegOptions};
pub use library::{AddParams, Library, LibraryConfig, LibraryError, Video};
pub use pipeline::{
    ChannelFilter, HttpSource, PipelineError, SourceResolver, StreamRequest, TranscodingWorkload,
};
pub use popularity::{Item, Queue};
pub use shutdown::StopHandle;
pub use storage::{LocalDriver, RemoteDriver, S3Driver, StorageError};
pub use sweeper::SweeperConfig;
pub use taskqueue::TaskQueue;
pub use tracing_setup::init_tracing;
pub use uploader::UploaderConfig;

/// Core errors that can bubble up from any sluice subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SluiceError {
    /// Library errors (records, tier movement, deadlines)
    #[error("library error: {0}")]
    Library(#[from] LibraryError),

    /// Storage driver errors (hot or warm tier)
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Dispatcher errors (shutdown, workload rejection)
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Encoder errors (external tool failures)
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Pipeline errors (admission, source fetching)
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database errors
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Standard I/O errors from filesystem operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the service.
pub type Result<T> = std::result::Result<T, SluiceError>;
