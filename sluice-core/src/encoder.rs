//! Encoder abstraction over an external transcoding tool.
//!
//! The service never re-implements transcoding; it shells out to ffmpeg
//! and only cares that a playable HLS rendition lands in the output
//! directory. The trait exists so the pipeline can run against a stub in
//! tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

/// Errors from driving the external encoder.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The encoder binary could not be spawned or its output read.
    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoder ran and reported failure.
    #[error("encoder exited with {status}: {stderr}")]
    Failed {
        /// Exit status as reported by the OS.
        status: String,
        /// Trailing stderr output for the log.
        stderr: String,
    },

    /// The encoder did not finish within its time budget.
    #[error("encoding timed out after {0:?}")]
    TimedOut(Duration),

    /// The encoder reported success but the playlist is missing.
    #[error("no playlist produced at {path}")]
    MissingOutput {
        /// Where the master playlist was expected.
        path: PathBuf,
    },
}

/// A finished HLS rendition on disk.
#[derive(Debug)]
pub struct EncodedStream {
    /// Path of the master playlist.
    pub manifest: PathBuf,
    /// Total size of all produced files in bytes.
    pub size: u64,
}

/// Produces an HLS rendition of a source file into a directory.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Transcodes `source` into `out_dir`, which is created if missing.
    ///
    /// # Errors
    ///
    /// - `EncodingError::Failed` - encoder reported an error
    /// - `EncodingError::TimedOut` - time budget ran out
    /// - `EncodingError::MissingOutput` - no master playlist was written
    async fn encode(&self, source: &Path, out_dir: &Path) -> Result<EncodedStream, EncodingError>;
}

/// Tunables for the ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    /// Video codec, "copy" to skip re-encoding.
    pub video_codec: String,
    /// Audio codec, "copy" to skip re-encoding.
    pub audio_codec: String,
    /// Target segment length in seconds.
    pub segment_seconds: u32,
    /// Wall-clock budget for one encode.
    pub timeout: Duration,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_owned(),
            audio_codec: "aac".to_owned(),
            segment_seconds: 6,
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Name of the master playlist every rendition must produce.
pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// ffmpeg-backed encoder.
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    options: FfmpegOptions,
}

impl FfmpegEncoder {
    /// Creates an encoder using the `ffmpeg` binary on `PATH`.
    pub fn new(options: FfmpegOptions) -> Self {
        Self::with_binary("ffmpeg", options)
    }

    /// Creates an encoder using a specific ffmpeg binary.
    pub fn with_binary(ffmpeg_path: impl Into<PathBuf>, options: FfmpegOptions) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            options,
        }
    }

    fn args(&self, source: &Path, out_dir: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            source.as_os_str().to_owned(),
            "-c:v".into(),
            self.options.video_codec.as_str().into(),
            "-c:a".into(),
            self.options.audio_codec.as_str().into(),
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.options.segment_seconds.to_string().into(),
            "-hls_playlist_type".into(),
            "vod".into(),
            "-hls_segment_filename".into(),
            out_dir.join("seg_%03d.ts").into(),
            "-master_pl_name".into(),
            MASTER_PLAYLIST.into(),
            out_dir.join("stream.m3u8").into(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, source: &Path, out_dir: &Path) -> Result<EncodedStream, EncodingError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let args = self.args(source, out_dir);
        debug!(binary = %self.ffmpeg_path.display(), ?args, "starting encode");

        let run = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.options.timeout, run)
            .await
            .map_err(|_| EncodingError::TimedOut(self.options.timeout))??;

        if !output.status.success() {
            return Err(EncodingError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let manifest = out_dir.join(MASTER_PLAYLIST);
        if !manifest.exists() {
            return Err(EncodingError::MissingOutput { path: manifest });
        }

        let size = dir_size(out_dir).await?;
        info!(source = %source.display(), out = %out_dir.display(), size, "encode finished");
        Ok(EncodedStream { manifest, size })
    }
}

/// Sums the sizes of the regular files directly under `dir`.
///
/// # Errors
///
/// - `std::io::Error` - directory walk failed
pub async fn dir_size(dir: &Path) -> Result<u64, std::io::Error> {
    let mut total = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            total += entry.metadata().await?.len();
        }
    }
    Ok(total)
}
