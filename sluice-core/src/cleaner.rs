//! Size-driven eviction loop.
//!
//! Keeps both tiers under their configured ceilings. The hot tier sheds
//! its least-recently-accessed streams first, but only those that also
//! exist remotely; a stream whose only copy is local is never destroyed
//! by the cleaner. The warm tier retires streams with the fewest
//! persisted views.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::library::{Library, LibraryError};
use crate::shutdown::StopHandle;

/// Cleaner tunables.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Time between passes.
    pub interval: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// Spawns the cleaning loop.
pub fn spawn(library: Arc<Library>, config: CleanerConfig) -> StopHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(interval = ?config.interval, "library cleaner started");
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = clean(&library).await {
                        warn!(%e, "cleaning pass failed");
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
        info!("library cleaner stopped");
    });
    StopHandle::new(stop_tx, handle)
}

async fn clean(library: &Library) -> Result<(), LibraryError> {
    clean_local(library).await?;
    clean_remote(library).await
}

async fn clean_local(library: &Library) -> Result<(), LibraryError> {
    let ceiling = library.max_local_size();
    if ceiling == 0 {
        return Ok(());
    }
    let total = library.local_size().await?;
    if total <= ceiling {
        return Ok(());
    }

    let mut excess = total - ceiling;
    info!(total, ceiling, excess, "hot tier over budget");
    for video in library.list_local().await? {
        if excess == 0 {
            break;
        }
        if !video.is_remote() {
            // Sole copy; the uploader has to move it off first.
            continue;
        }
        match library.furlough(&video).await {
            Ok(()) => excess = excess.saturating_sub(video.size.max(0) as u64),
            Err(e) => warn!(sd_hash = %video.sd_hash, %e, "furlough failed, skipping"),
        }
    }
    if excess > 0 {
        warn!(excess, "hot tier still over budget, nothing left to furlough");
    }
    Ok(())
}

async fn clean_remote(library: &Library) -> Result<(), LibraryError> {
    let ceiling = library.max_remote_size();
    if ceiling == 0 {
        return Ok(());
    }
    let total = library.remote_size().await?;
    if total <= ceiling {
        return Ok(());
    }

    let mut excess = total - ceiling;
    info!(total, ceiling, excess, "warm tier over budget");
    for video in library.list_remote_only().await? {
        if excess == 0 {
            break;
        }
        match library.retire(&video).await {
            Ok(()) => excess = excess.saturating_sub(video.size.max(0) as u64),
            Err(e) => warn!(sd_hash = %video.sd_hash, %e, "retire failed, skipping"),
        }
    }
    Ok(())
}
