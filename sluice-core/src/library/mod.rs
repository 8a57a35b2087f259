//! Two-tier video library.
//!
//! Tracks which streams exist, how big they are, and which tier holds
//! their bytes. Tier movement composes "delete bytes, then amend the
//! record": furloughing drops the local copy but keeps the stream
//! reachable remotely, retiring forgets the stream entirely. A record
//! whose local path is set but whose files are gone can only exist
//! transiently during a furlough; the cleaner treats such records as
//! already furloughed.

mod queries;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::Db;
use crate::pipeline::StreamRequest;
use crate::popularity::Queue;
use crate::storage::{LocalDriver, RemoteDriver, StorageError};

use queries::{Queries, Tier};

/// Schema for the video database, applied at startup.
pub const INITIAL_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    sd_hash TEXT NOT NULL PRIMARY KEY,
    url TEXT NOT NULL,
    local_path TEXT NOT NULL DEFAULT '',
    remote_url TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL,
    views INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_videos_last_accessed ON videos (last_accessed);
CREATE INDEX IF NOT EXISTS idx_videos_views ON videos (views);
"#;

const TIER_OP_DEADLINE: Duration = Duration::from_secs(5);
const UPDATE_DEADLINE: Duration = Duration::from_secs(2);
const LIST_DEADLINE: Duration = Duration::from_secs(20);

/// Errors surfaced by library operations.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// No record under this hash.
    #[error("video {sd_hash} not found")]
    NotFound {
        /// Hash that missed.
        sd_hash: String,
    },

    /// A record under this hash already exists.
    #[error("video {sd_hash} already exists")]
    AlreadyExists {
        /// Hash that collided.
        sd_hash: String,
    },

    /// Operation exceeded its deadline.
    #[error("library operation timed out")]
    Deadline,

    /// Tier movement was requested but no remote driver is configured.
    #[error("no remote storage configured")]
    NoRemoteStorage,

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Byte-tier failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One tracked stream.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Video {
    /// Canonical stream identifier, 96 hex characters.
    pub sd_hash: String,
    /// Source identifier the stream was transcoded from.
    pub url: String,
    /// Hot-tier directory; empty when there is no local copy.
    pub local_path: String,
    /// Warm-tier URL; empty when there is no remote copy.
    pub remote_url: String,
    /// Total size of the stream's files in bytes.
    pub size: i64,
    /// Persisted popularity, folded in from the request counters.
    pub views: i64,
    /// Insertion time, epoch milliseconds.
    pub created_at: i64,
    /// Last cache hit, epoch milliseconds.
    pub last_accessed: i64,
}

impl Video {
    /// True when the hot tier holds this stream.
    pub fn is_local(&self) -> bool {
        !self.local_path.is_empty()
    }

    /// True when the warm tier holds this stream.
    pub fn is_remote(&self) -> bool {
        !self.remote_url.is_empty()
    }
}

/// Fields for inserting a new video record.
#[derive(Debug, Clone, Default)]
pub struct AddParams {
    /// Canonical stream identifier.
    pub sd_hash: String,
    /// Source identifier.
    pub url: String,
    /// Hot-tier directory, if the bytes were just written locally.
    pub local_path: String,
    /// Warm-tier URL, if the bytes already live remotely.
    pub remote_url: String,
    /// Total stream size in bytes.
    pub size: i64,
}

/// Everything the library needs at construction time.
pub struct LibraryConfig {
    /// Handle to the video database.
    pub db: Db,
    /// Hot-tier driver.
    pub local: LocalDriver,
    /// Warm-tier driver, when object storage is configured.
    pub remote: Option<Arc<dyn RemoteDriver>>,
    /// Popularity counters fed by the serving layer.
    pub queue: Arc<Queue<StreamRequest>>,
    /// Hot-tier size ceiling in bytes.
    pub max_local_size: u64,
    /// Warm-tier size ceiling in bytes.
    pub max_remote_size: u64,
}

/// Video metadata plus tier movement.
pub struct Library {
    queries: Queries,
    local: LocalDriver,
    remote: Option<Arc<dyn RemoteDriver>>,
    queue: Arc<Queue<StreamRequest>>,
    max_local_size: u64,
    max_remote_size: u64,
}

impl Library {
    /// Builds a library over an already-migrated video database.
    pub fn new(config: LibraryConfig) -> Self {
        Self {
            queries: Queries::new(config.db.pool().clone()),
            local: config.local,
            remote: config.remote,
            queue: config.queue,
            max_local_size: config.max_local_size,
            max_remote_size: config.max_remote_size,
        }
    }

    /// Hot-tier driver.
    pub fn local(&self) -> &LocalDriver {
        &self.local
    }

    /// Warm-tier driver, when configured.
    pub fn remote(&self) -> Option<&Arc<dyn RemoteDriver>> {
        self.remote.as_ref()
    }

    /// Hot-tier ceiling in bytes.
    pub fn max_local_size(&self) -> u64 {
        self.max_local_size
    }

    /// Warm-tier ceiling in bytes.
    pub fn max_remote_size(&self) -> u64 {
        self.max_remote_size
    }

    /// Counts a request against the popularity queue. This is the only
    /// path from the serving layer into the admission machinery.
    pub fn inc_views(&self, uri: &str, sd_hash: &str) {
        self.queue.hit(
            sd_hash,
            StreamRequest {
                uri: uri.to_owned(),
                sd_hash: sd_hash.to_owned(),
            },
        );
    }

    /// Inserts a new video record.
    ///
    /// # Errors
    ///
    /// - `LibraryError::AlreadyExists` - a record under this hash exists
    /// - `LibraryError::Db` - insertion failed
    pub async fn add(&self, params: AddParams) -> Result<Video, LibraryError> {
        let sd_hash = params.sd_hash.clone();
        match self.queries.add(params).await {
            Ok(video) => Ok(video),
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
                Err(LibraryError::AlreadyExists { sd_hash })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Looks a video up by hash.
    ///
    /// # Errors
    ///
    /// - `LibraryError::NotFound` - no record under this hash
    pub async fn get(&self, sd_hash: &str) -> Result<Video, LibraryError> {
        self.queries
            .get(sd_hash)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                sd_hash: sd_hash.to_owned(),
            })
    }

    /// Drops the local copy of a video: bytes first, then the record's
    /// local path. If the byte delete fails the record is left untouched
    /// so the next pass can retry. Already-furloughed videos succeed.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Storage` - local delete failed
    /// - `LibraryError::Deadline` - the 5 second budget ran out
    pub async fn furlough(&self, video: &Video) -> Result<(), LibraryError> {
        deadline(TIER_OP_DEADLINE, async {
            self.local.delete(&video.sd_hash).await?;
            self.queries.update_path(&video.sd_hash, "").await?;
            info!(
                sd_hash = %video.sd_hash,
                url = %video.url,
                size = video.size,
                last_accessed = video.last_accessed,
                "video furloughed"
            );
            Ok(())
        })
        .await
    }

    /// Removes the remote copy and the record itself. A later `get`
    /// reports the video as unknown.
    ///
    /// # Errors
    ///
    /// - `LibraryError::NoRemoteStorage` - no remote driver configured
    /// - `LibraryError::Storage` - remote delete failed; record kept
    /// - `LibraryError::Deadline` - the 5 second budget ran out
    pub async fn retire(&self, video: &Video) -> Result<(), LibraryError> {
        let remote = self.remote.as_ref().ok_or(LibraryError::NoRemoteStorage)?;
        deadline(TIER_OP_DEADLINE, async {
            remote.delete(&video.sd_hash).await?;
            self.queries.delete(&video.sd_hash).await?;
            info!(
                sd_hash = %video.sd_hash,
                url = %video.url,
                size = video.size,
                "video retired"
            );
            Ok(())
        })
        .await
    }

    /// Records the warm-tier URL once an upload finishes.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn update_remote_path(&self, sd_hash: &str, url: &str) -> Result<(), LibraryError> {
        deadline(UPDATE_DEADLINE, async {
            Ok(self.queries.update_remote_path(sd_hash, url).await?)
        })
        .await
    }

    /// Bumps a video's last-access time. Called on cache hits.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn update_access(&self, sd_hash: &str) -> Result<(), LibraryError> {
        deadline(UPDATE_DEADLINE, async {
            Ok(self.queries.update_access(sd_hash).await?)
        })
        .await
    }

    /// Folds observed request counts into the persisted view counter.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn add_views(&self, sd_hash: &str, views: u64) -> Result<(), LibraryError> {
        deadline(UPDATE_DEADLINE, async {
            Ok(self.queries.add_views(sd_hash, views).await?)
        })
        .await
    }

    /// Videos with a local copy, oldest-accessed first.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn list_local(&self) -> Result<Vec<Video>, LibraryError> {
        deadline(LIST_DEADLINE, async { Ok(self.queries.list_local().await?) }).await
    }

    /// Videos that exist only locally, oldest first. These are the
    /// uploader's backlog.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn list_local_only(&self) -> Result<Vec<Video>, LibraryError> {
        deadline(LIST_DEADLINE, async {
            Ok(self.queries.list_local_only().await?)
        })
        .await
    }

    /// Videos that exist only remotely, fewest views first. These are the
    /// retirement candidates.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn list_remote_only(&self) -> Result<Vec<Video>, LibraryError> {
        deadline(LIST_DEADLINE, async {
            Ok(self.queries.list_remote_only().await?)
        })
        .await
    }

    /// Total bytes tracked on the hot tier.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn local_size(&self) -> Result<u64, LibraryError> {
        deadline(LIST_DEADLINE, async {
            Ok(self.queries.tier_size(Tier::Local).await?)
        })
        .await
    }

    /// Total bytes tracked on the warm tier.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Db` / `LibraryError::Deadline`
    pub async fn remote_size(&self) -> Result<u64, LibraryError> {
        deadline(LIST_DEADLINE, async {
            Ok(self.queries.tier_size(Tier::Remote).await?)
        })
        .await
    }
}

async fn deadline<T, F>(limit: Duration, fut: F) -> Result<T, LibraryError>
where
    F: Future<Output = Result<T, LibraryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("library operation exceeded its deadline");
            Err(LibraryError::Deadline)
        }
    }
}
