//! Warm-tier replication loop.
//!
//! Streams that only exist locally are copied into the object store and
//! their records gain a remote URL. Only after that may the cleaner
//! furlough their local bytes. Upload failures are logged and the stream
//! stays in the backlog for the next pass.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::library::{Library, LibraryError};
use crate::shutdown::StopHandle;

/// Uploader tunables.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Time between passes.
    pub interval: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Spawns the upload loop. Callers only do this when a remote driver is
/// configured.
pub fn spawn(library: Arc<Library>, config: UploaderConfig) -> StopHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(interval = ?config.interval, "uploader started");
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = upload_backlog(&library).await {
                        warn!(%e, "upload pass failed");
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
        info!("uploader stopped");
    });
    StopHandle::new(stop_tx, handle)
}

async fn upload_backlog(library: &Library) -> Result<(), LibraryError> {
    let Some(remote) = library.remote() else {
        return Ok(());
    };
    let backlog = library.list_local_only().await?;
    for video in backlog {
        match upload_one(library, remote.as_ref(), &video.sd_hash).await {
            Ok(()) => {}
            Err(e) => warn!(sd_hash = %video.sd_hash, %e, "upload failed, will retry"),
        }
    }
    Ok(())
}

async fn upload_one(
    library: &Library,
    remote: &dyn crate::storage::RemoteDriver,
    sd_hash: &str,
) -> Result<(), LibraryError> {
    let stream = library.local().open(sd_hash).await?;
    let mut files = 0usize;
    for name in stream.file_names().await? {
        let data = stream.read_file(&name).await?;
        remote.put(sd_hash, &name, Bytes::from(data)).await?;
        files += 1;
    }
    let url = remote.url(sd_hash);
    library.update_remote_path(sd_hash, &url).await?;
    info!(%sd_hash, files, %url, "stream uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;
    use crate::db::Db;
    use crate::library::{AddParams, LibraryConfig, INITIAL_MIGRATION};
    use crate::pipeline::StreamRequest;
    use crate::popularity::Queue;
    use crate::storage::{LocalDriver, RemoteDriver, S3Driver};

    async fn library_with_remote(tmp: &std::path::Path) -> Arc<Library> {
        let db = Db::open(tmp.join("video.sqlite")).await.expect("open");
        db.migrate_up(INITIAL_MIGRATION).await.expect("migrate");
        Arc::new(Library::new(LibraryConfig {
            db,
            local: LocalDriver::new(tmp.join("videos")),
            remote: Some(Arc::new(S3Driver::new(
                Arc::new(InMemory::new()),
                "https://warm.test/bucket",
            ))),
            queue: Arc::new(Queue::<StreamRequest>::new()),
            max_local_size: 1 << 30,
            max_remote_size: 1 << 30,
        }))
    }

    #[tokio::test]
    async fn backlog_is_replicated_and_marked() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let library = library_with_remote(tmp.path()).await;

        library
            .local()
            .put("abc", "master.m3u8", b"#EXTM3U")
            .await
            .expect("put");
        library
            .local()
            .put("abc", "seg_000.ts", &[0u8; 50])
            .await
            .expect("put");
        library
            .add(AddParams {
                sd_hash: "abc".to_owned(),
                url: "lbry://abc".to_owned(),
                local_path: "abc".to_owned(),
                remote_url: String::new(),
                size: 57,
            })
            .await
            .expect("add");

        upload_backlog(&library).await.expect("upload");

        let video = library.get("abc").await.expect("get");
        assert_eq!("https://warm.test/bucket/abc", video.remote_url);

        let remote = library.remote().expect("remote");
        assert_eq!(
            Bytes::from_static(b"#EXTM3U"),
            remote.get("abc", "master.m3u8").await.expect("remote get")
        );
        assert_eq!(50, remote.get("abc", "seg_000.ts").await.expect("remote get").len());

        // Once marked remote the stream leaves the backlog.
        assert!(library.list_local_only().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_local_files_do_not_wedge_the_pass() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let library = library_with_remote(tmp.path()).await;

        // Record says local, files are gone.
        library
            .add(AddParams {
                sd_hash: "ghost".to_owned(),
                url: "lbry://ghost".to_owned(),
                local_path: "ghost".to_owned(),
                remote_url: String::new(),
                size: 10,
            })
            .await
            .expect("add");

        upload_backlog(&library).await.expect("upload pass");
        assert!(library.get("ghost").await.expect("get").remote_url.is_empty());
    }
}
