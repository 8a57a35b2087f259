//! Popularity-driven admission loop.
//!
//! Every tick the sweeper drains the hottest entries from the request
//! counters and turns the ones above the admission threshold into
//! transcoding tasks. Entries that already have a video record only get
//! their hits persisted; entries below the threshold go back into the
//! queue to keep accumulating.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::library::{Library, LibraryError};
use crate::pipeline::StreamRequest;
use crate::popularity::Queue;
use crate::shutdown::StopHandle;
use crate::taskqueue::TaskQueue;

/// Sweeper tunables.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Minimum hit count a stream must exceed to be admitted.
    pub lower_bound: u64,
    /// Maximum number of streams admitted per pass.
    pub top_number: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            lower_bound: 10,
            top_number: 20,
        }
    }
}

/// Spawns the sweeper loop.
pub fn spawn(
    queue: Arc<Queue<StreamRequest>>,
    library: Arc<Library>,
    journal: TaskQueue,
    dispatcher: Dispatcher<StreamRequest>,
    config: SweeperConfig,
) -> StopHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(
            interval = ?config.interval,
            lower_bound = config.lower_bound,
            top_number = config.top_number,
            "popular sweeper started"
        );
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so a fresh
        // start does not sweep an empty queue.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep(&queue, &library, &journal, &dispatcher, &config).await {
                        warn!(%e, "sweep pass failed");
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
        info!("popular sweeper stopped");
    });
    StopHandle::new(stop_tx, handle)
}

async fn sweep(
    queue: &Queue<StreamRequest>,
    library: &Library,
    journal: &TaskQueue,
    dispatcher: &Dispatcher<StreamRequest>,
    config: &SweeperConfig,
) -> Result<(), LibraryError> {
    for _ in 0..config.top_number {
        let Some(item) = queue.pop() else { break };

        // Entries pop hottest-first, so one below the bound ends the pass.
        if item.hits() <= config.lower_bound {
            debug!(key = item.key(), hits = item.hits(), "below admission bound, retained");
            queue.release(item.key());
            break;
        }

        match library.get(item.key()).await {
            Ok(_) => {
                // Already transcoded; persist the demand and forget the entry.
                library.add_views(item.key(), item.hits()).await?;
                queue.fold(item.key());
            }
            Err(LibraryError::NotFound { .. }) => {
                let admitted = journal.journal(&item.value.uri, &item.value.sd_hash).await?;
                if admitted {
                    info!(key = item.key(), hits = item.hits(), "admitting stream for transcoding");
                    if dispatcher.dispatch(item.value.clone()).await.is_err() {
                        // Dispatcher is shutting down; keep the entry for
                        // the next process.
                        queue.release(item.key());
                        break;
                    }
                }
                queue.fold(item.key());
            }
            Err(e) => {
                // Transient library trouble; put the entry back and retry
                // next pass.
                queue.release(item.key());
                return Err(e);
            }
        }
    }
    Ok(())
}
