//! CLI command implementations.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use sluice_core::config::parse_size;
use sluice_core::pipeline::{ChannelFilter, HttpSource, TranscodingWorkload};
use sluice_core::popularity::Queue;
use sluice_core::storage::{LocalDriver, RemoteDriver, S3Driver};
use sluice_core::{
    cleaner, library, sweeper, taskqueue, uploader, CleanerConfig, Db, Dispatcher, FfmpegEncoder,
    FfmpegOptions, Library, LibraryConfig, SluiceConfig, StreamRequest, SweeperConfig, TaskQueue,
    UploaderConfig,
};
use sluice_web::AppState;
use tokio::sync::watch;
use tracing::{info, warn};

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the transcoding server
    Serve(ServeArgs),
}

/// Flags for the `serve` command.
#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = ":8080")]
    pub bind: String,
    /// Path to store database files and configs
    #[arg(long, default_value = ".")]
    pub data_path: PathBuf,
    /// Path to store videos
    #[arg(long, default_value = ".")]
    pub video_path: PathBuf,
    /// Number of transcoding workers to start
    #[arg(long, default_value_t = 10)]
    pub workers: usize,
    /// CDN endpoint address, overrides the config file
    #[arg(long)]
    pub cdn: Option<String>,
    /// Debug logging
    #[arg(long)]
    pub debug: bool,
    /// Write a full trace log under the data path
    #[arg(long)]
    pub profile_trace: bool,
}

/// Runs the server until SIGINT/SIGTERM, then shuts everything down in
/// dependency order.
pub async fn serve(args: ServeArgs) -> sluice_core::Result<()> {
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let trace_dir = args.profile_trace.then(|| args.data_path.join("logs"));
    sluice_core::init_tracing(level, trace_dir.as_deref())?;

    let mut config = SluiceConfig::load(&args.data_path.join("sluice.toml"))?;
    if let Some(cdn) = args.cdn {
        config.cdn_server = cdn;
    }

    let vdb = Db::open(args.data_path.join("video.sqlite")).await?;
    vdb.migrate_up(library::INITIAL_MIGRATION).await?;
    let qdb = Db::open(args.data_path.join("queue.sqlite")).await?;
    qdb.migrate_up(taskqueue::INITIAL_MIGRATION).await?;

    let remote: Option<Arc<dyn RemoteDriver>> = match &config.wasabi {
        Some(wasabi) => {
            let driver = S3Driver::connect(
                &wasabi.endpoint,
                &wasabi.region,
                &wasabi.bucket,
                &wasabi.key,
                &wasabi.secret,
            )?;
            info!(bucket = %wasabi.bucket, "wasabi storage configured");
            Some(Arc::new(driver))
        }
        None => None,
    };
    let max_remote_size = match &config.wasabi {
        Some(wasabi) => parse_size(&wasabi.max_size)?,
        None => 0,
    };

    let queue = Arc::new(Queue::<StreamRequest>::new());
    let library = Arc::new(Library::new(LibraryConfig {
        db: vdb,
        local: LocalDriver::new(&args.video_path),
        remote,
        queue: Arc::clone(&queue),
        max_local_size: parse_size(&config.local.max_size)?,
        max_remote_size,
    }));
    let journal = TaskQueue::new(&qdb);
    let channels = ChannelFilter::new(config.enabled_channels.clone());

    let workload = TranscodingWorkload::new(
        Arc::clone(&library),
        journal.clone(),
        Arc::new(FfmpegEncoder::new(FfmpegOptions::default())),
        Arc::new(HttpSource::new(config.cdn_server.clone())),
        channels.clone(),
    );
    let dispatcher = Dispatcher::start(args.workers, workload);
    info!(workers = args.workers, "dispatcher started");

    // Work journaled by a previous process but never finished goes back
    // into the fleet first.
    let backlog = journal.unfinished().await?;
    if !backlog.is_empty() {
        info!(count = backlog.len(), "re-dispatching unfinished tasks");
        for row in backlog {
            let request = StreamRequest {
                uri: row.url,
                sd_hash: row.sd_hash,
            };
            if dispatcher.dispatch(request).await.is_err() {
                break;
            }
        }
    }

    let uploader_handle = library
        .remote()
        .is_some()
        .then(|| uploader::spawn(Arc::clone(&library), UploaderConfig::default()));
    let sweeper_handle = sweeper::spawn(
        Arc::clone(&queue),
        Arc::clone(&library),
        journal.clone(),
        dispatcher.clone(),
        SweeperConfig {
            interval: config.sweeper.interval(),
            lower_bound: config.sweeper.lower_bound,
            top_number: config.sweeper.top_number,
        },
    );
    let cleaner_handle = cleaner::spawn(Arc::clone(&library), CleanerConfig::default());

    let state = AppState {
        library: Arc::clone(&library),
        channels,
    };
    let bind = normalize_bind(&args.bind);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx.clone();
    sluice_web::run_server(&bind, state, async move {
        let _ = server_shutdown.changed().await;
    })
    .await?;

    info!("shutting down");
    sweeper_handle.stop().await;
    cleaner_handle.stop().await;
    if let Some(handle) = uploader_handle {
        handle.stop().await;
    }
    dispatcher.stop().await;
    info!("bye");
    Ok(())
}

/// Accepts Go-style `:8080` bind addresses next to full `host:port` ones.
fn normalize_bind(bind: &str) -> String {
    if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_owned()
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                warn!(%e, "could not install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("caught interrupt signal"),
            _ = term.recv() => info!("caught termination signal"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("caught interrupt signal");
    }
}
