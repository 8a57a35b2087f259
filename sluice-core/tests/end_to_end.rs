//! Full-service flow: demand is counted, the sweeper admits the stream,
//! a worker transcodes it into the hot tier, the uploader replicates it
//! and the cleaner furloughs the local copy once the tier is over
//! budget.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use object_store::memory::InMemory;
use sluice_core::cleaner::{self, CleanerConfig};
use sluice_core::encoder::{EncodedStream, Encoder, EncodingError, MASTER_PLAYLIST};
use sluice_core::library::{self, Library, LibraryConfig};
use sluice_core::pipeline::{
    ChannelFilter, PipelineError, SourceResolver, StreamRequest, TranscodingWorkload,
};
use sluice_core::popularity::Queue;
use sluice_core::storage::{LocalDriver, S3Driver};
use sluice_core::sweeper::{self, SweeperConfig};
use sluice_core::taskqueue::{self, TaskQueue};
use sluice_core::uploader::{self, UploaderConfig};
use sluice_core::{Db, Dispatcher};

struct InstantSource;

#[async_trait]
impl SourceResolver for InstantSource {
    async fn fetch_source(
        &self,
        _request: &StreamRequest,
        workdir: &Path,
    ) -> Result<std::path::PathBuf, PipelineError> {
        let path = workdir.join("source");
        tokio::fs::write(&path, [0u8; 256]).await?;
        Ok(path)
    }
}

struct InstantEncoder;

#[async_trait]
impl Encoder for InstantEncoder {
    async fn encode(&self, _source: &Path, out_dir: &Path) -> Result<EncodedStream, EncodingError> {
        tokio::fs::create_dir_all(out_dir).await?;
        tokio::fs::write(out_dir.join(MASTER_PLAYLIST), b"#EXTM3U").await?;
        tokio::fs::write(out_dir.join("seg_000.ts"), [0u8; 2000]).await?;
        Ok(EncodedStream {
            manifest: out_dir.join(MASTER_PLAYLIST),
            size: 2007,
        })
    }
}

async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !probe().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn demand_flows_through_to_a_furloughed_remote_copy() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let vdb = Db::open(tmp.path().join("video.sqlite")).await.expect("open");
    vdb.migrate_up(library::INITIAL_MIGRATION).await.expect("migrate");
    let qdb = Db::open(tmp.path().join("queue.sqlite")).await.expect("open");
    qdb.migrate_up(taskqueue::INITIAL_MIGRATION).await.expect("migrate");

    let queue = Arc::new(Queue::<StreamRequest>::new());
    // A ceiling of 1000 bytes is below the 2007-byte rendition, so the
    // cleaner must furlough it as soon as a remote copy exists.
    let library = Arc::new(Library::new(LibraryConfig {
        db: vdb,
        local: LocalDriver::new(tmp.path().join("videos")),
        remote: Some(Arc::new(S3Driver::new(
            Arc::new(InMemory::new()),
            "https://warm.test/bucket",
        ))),
        queue: Arc::clone(&queue),
        max_local_size: 1000,
        max_remote_size: 1 << 30,
    }));
    let journal = TaskQueue::new(&qdb);

    let workload = TranscodingWorkload::new(
        Arc::clone(&library),
        journal.clone(),
        Arc::new(InstantEncoder),
        Arc::new(InstantSource),
        ChannelFilter::default(),
    );
    let dispatcher = Dispatcher::start(4, workload);

    let sweeper = sweeper::spawn(
        Arc::clone(&queue),
        Arc::clone(&library),
        journal.clone(),
        dispatcher.clone(),
        SweeperConfig {
            interval: Duration::from_millis(50),
            lower_bound: 2,
            top_number: 5,
        },
    );
    let uploader = uploader::spawn(
        Arc::clone(&library),
        UploaderConfig {
            interval: Duration::from_millis(50),
        },
    );
    let cleaner = cleaner::spawn(
        Arc::clone(&library),
        CleanerConfig {
            interval: Duration::from_millis(50),
        },
    );

    let sd_hash = "a".repeat(96);
    let uri = "lbry://@chan#1/title#b7b150d1bbca4650ad4ab921dd8d424bf77c1141";
    for _ in 0..10 {
        library.inc_views(uri, &sd_hash);
    }

    // Admission and transcoding.
    wait_until("video transcoded", || {
        let library = Arc::clone(&library);
        let sd_hash = sd_hash.clone();
        async move { library.get(&sd_hash).await.is_ok() }
    })
    .await;

    // Replication to the warm tier.
    wait_until("remote copy registered", || {
        let library = Arc::clone(&library);
        let sd_hash = sd_hash.clone();
        async move {
            library
                .get(&sd_hash)
                .await
                .map(|v| v.is_remote())
                .unwrap_or(false)
        }
    })
    .await;

    // Local copy furloughed once replicated and over budget.
    wait_until("local copy furloughed", || {
        let library = Arc::clone(&library);
        let sd_hash = sd_hash.clone();
        async move {
            library
                .get(&sd_hash)
                .await
                .map(|v| !v.is_local() && v.is_remote())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(library.local().open(&sd_hash).await.is_err());

    // The journal settled and no repeat admission is pending.
    assert!(!journal.is_live(&sd_hash).await.expect("journal"));

    sweeper.stop().await;
    uploader.stop().await;
    cleaner.stop().await;
    dispatcher.stop().await;
}
