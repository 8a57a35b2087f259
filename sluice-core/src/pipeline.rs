//! Transcoding pipeline: from an admitted stream request to a registered
//! local video.
//!
//! The pipeline is the dispatcher workload. For each task it marks the
//! journal row, pulls the source through a [`SourceResolver`], runs the
//! [`Encoder`](crate::encoder::Encoder) into the hot tier and registers
//! the result with the library. Failures mark the row failed so the
//! sweeper can re-admit the stream later.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::dispatcher::{DispatchError, Task, Workload};
use crate::encoder::{Encoder, EncodingError};
use crate::library::{AddParams, Library, LibraryError};
use crate::taskqueue::TaskQueue;

/// A demanded stream: what the popularity queue counts and the
/// dispatcher routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Stream identifier as requested, e.g. `lbry://@chan#3/title#claim`.
    pub uri: String,
    /// Canonical 96-hex stream identifier.
    pub sd_hash: String,
}

/// Errors from one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The stream's channel is not on the enabled list.
    #[error("channel of {uri} is not enabled")]
    ChannelDisabled {
        /// Offending stream identifier.
        uri: String,
    },

    /// The stream identifier carries no claim id to fetch by.
    #[error("no claim id in {uri}")]
    BadUri {
        /// Offending stream identifier.
        uri: String,
    },

    /// Source download failed.
    #[error("source fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The encoder failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Registering the result failed.
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// Journal access failed.
    #[error("task journal error: {0}")]
    Journal(#[from] sqlx::Error),

    /// Scratch-space handling failed.
    #[error("pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts the trailing 40-hex claim id from a stream identifier.
/// The claim id is the fetch key towards the CDN; it is not the sd-hash.
pub fn claim_id(uri: &str) -> Option<&str> {
    let candidate = uri.rsplit('#').next()?;
    (candidate.len() == 40 && candidate.bytes().all(|b| b.is_ascii_hexdigit()))
        .then_some(candidate)
}

/// Extracts the channel part of a stream identifier, e.g. `@chan#3` from
/// `lbry://@chan#3/title#claim`.
pub fn channel_of(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("lbry://").unwrap_or(uri);
    if !rest.starts_with('@') {
        return None;
    }
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Admission filter over stream channels. An empty list admits everything.
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    enabled: Vec<String>,
}

impl ChannelFilter {
    /// Builds a filter from the configured channel list.
    pub fn new(enabled: Vec<String>) -> Self {
        Self { enabled }
    }

    /// True when the stream may be transcoded.
    pub fn allows(&self, uri: &str) -> bool {
        if self.enabled.is_empty() {
            return true;
        }
        channel_of(uri).is_some_and(|c| self.enabled.iter().any(|e| e == c))
    }
}

/// Obtains the source media for a stream, placing it under `workdir`.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Downloads or locates the source and returns its path.
    ///
    /// # Errors
    ///
    /// - `PipelineError::BadUri` - identifier cannot be resolved
    /// - `PipelineError::Fetch` - transfer failed
    async fn fetch_source(
        &self,
        request: &StreamRequest,
        workdir: &Path,
    ) -> Result<PathBuf, PipelineError>;
}

/// CDN-backed source resolver.
pub struct HttpSource {
    client: reqwest::Client,
    base: String,
}

impl HttpSource {
    /// Creates a resolver fetching sources from `base`, the CDN streams
    /// endpoint.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into(),
        }
    }
}

#[async_trait]
impl SourceResolver for HttpSource {
    async fn fetch_source(
        &self,
        request: &StreamRequest,
        workdir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let claim = claim_id(&request.uri).ok_or_else(|| PipelineError::BadUri {
            uri: request.uri.clone(),
        })?;
        let url = format!("{}/{}", self.base.trim_end_matches('/'), claim);
        info!(%url, sd_hash = %request.sd_hash, "fetching source");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let path = workdir.join("source");
        tokio::fs::write(&path, &body).await?;
        Ok(path)
    }
}

/// The dispatcher workload that turns requests into local videos.
#[derive(Clone)]
pub struct TranscodingWorkload {
    library: Arc<Library>,
    journal: TaskQueue,
    encoder: Arc<dyn Encoder>,
    resolver: Arc<dyn SourceResolver>,
    channels: ChannelFilter,
}

impl TranscodingWorkload {
    /// Wires the workload up to its collaborators.
    pub fn new(
        library: Arc<Library>,
        journal: TaskQueue,
        encoder: Arc<dyn Encoder>,
        resolver: Arc<dyn SourceResolver>,
        channels: ChannelFilter,
    ) -> Self {
        Self {
            library,
            journal,
            encoder,
            resolver,
            channels,
        }
    }

    async fn process(&self, request: &StreamRequest) -> Result<(), PipelineError> {
        if !self.channels.allows(&request.uri) {
            return Err(PipelineError::ChannelDisabled {
                uri: request.uri.clone(),
            });
        }

        self.journal.mark_started(&request.sd_hash).await?;

        let workdir = std::env::temp_dir().join("sluice-src").join(&request.sd_hash);
        tokio::fs::create_dir_all(&workdir).await?;

        let result = self.transcode(request, &workdir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(dir = %workdir.display(), %e, "could not clean scratch dir");
        }
        result
    }

    async fn transcode(
        &self,
        request: &StreamRequest,
        workdir: &Path,
    ) -> Result<(), PipelineError> {
        let source = self.resolver.fetch_source(request, workdir).await?;
        let out_dir = self.library.local().path(&request.sd_hash);

        let encoded = match self.encoder.encode(&source, &out_dir).await {
            Ok(encoded) => encoded,
            Err(e) => {
                // Partial renditions must not linger on the hot tier.
                let _ = tokio::fs::remove_dir_all(&out_dir).await;
                return Err(e.into());
            }
        };

        let added = self
            .library
            .add(AddParams {
                sd_hash: request.sd_hash.clone(),
                url: request.uri.clone(),
                local_path: request.sd_hash.clone(),
                remote_url: String::new(),
                size: encoded.size as i64,
            })
            .await;
        match added {
            Ok(video) => info!(sd_hash = %video.sd_hash, size = video.size, "video transcoded"),
            Err(LibraryError::AlreadyExists { sd_hash }) => {
                warn!(%sd_hash, "video was registered while transcoding")
            }
            Err(e) => return Err(e.into()),
        }

        self.journal.mark_done(&request.sd_hash).await?;
        Ok(())
    }
}

#[async_trait]
impl Workload<StreamRequest> for TranscodingWorkload {
    async fn run(&self, task: Task<StreamRequest>) -> Result<(), DispatchError> {
        let request = task.payload;
        match self.process(&request).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(e) = self.journal.mark_failed(&request.sd_hash).await {
                    error!(sd_hash = %request.sd_hash, %e, "could not mark task failed");
                }
                Err(DispatchError::Workload {
                    reason: err.to_string(),
                })
            }
        }
    }
}
