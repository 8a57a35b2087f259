//! Stop handles for the periodic background loops.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a background loop. Dropping it does not stop the loop;
/// call [`StopHandle::stop`] to shut it down and wait for it.
pub struct StopHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl StopHandle {
    /// Pairs a stop channel with the loop's join handle.
    pub fn new(stop: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self { stop, handle }
    }

    /// Signals the loop to finish its current unit of work and waits
    /// until it has exited.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
