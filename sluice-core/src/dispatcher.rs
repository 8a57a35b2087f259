//! Task dispatcher with a fixed worker fleet.
//!
//! Tasks enter through a bounded intake channel and are handed to whichever
//! worker reports itself free, so a slow task never parks work behind one
//! busy worker. The routing loop performs the handoff inline and never
//! spawns per-task helpers, which keeps the task count flat under load.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Intake channel capacity. `dispatch` blocks once this many tasks are
/// waiting for a free worker.
const INTAKE_CAPACITY: usize = 2000;

/// Free-worker registry capacity. Bounds how many idle workers can be
/// parked at once, so it only needs to exceed the fleet size.
const REGISTRY_CAPACITY: usize = 200;

/// Errors surfaced by the dispatcher and its workloads.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Workload received a payload it does not know how to handle.
    #[error("invalid payload")]
    InvalidPayload,

    /// Dispatcher has been stopped; no more tasks are accepted.
    #[error("dispatcher is closed")]
    Closed,

    /// Workload failed while processing a task.
    #[error("workload failed: {reason}")]
    Workload {
        /// Human-readable description of the workload failure.
        reason: String,
    },
}

/// Unit of work routed to a worker.
///
/// Carries a handle back to the dispatcher so workloads can submit
/// follow-up tasks without holding a separate reference.
pub struct Task<P> {
    /// Caller-supplied payload.
    pub payload: P,
    /// Handle to the dispatcher this task came through.
    pub dispatcher: Dispatcher<P>,
}

/// Work executed by the fleet, one task at a time per worker.
#[async_trait]
pub trait Workload<P>: Send + Sync + 'static {
    /// Processes a single task. Errors are logged by the worker and the
    /// task is dropped; retries belong to the workload itself.
    ///
    /// # Errors
    ///
    /// - `DispatchError::InvalidPayload` - payload type is not handled
    /// - `DispatchError::Workload` - the work itself failed
    async fn run(&self, task: Task<P>) -> Result<(), DispatchError>;
}

struct Shared {
    workers: Mutex<Vec<JoinHandle<()>>>,
    router: Mutex<Option<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

/// Cloneable handle to a running worker fleet.
pub struct Dispatcher<P> {
    intake: mpsc::Sender<Task<P>>,
    shared: Arc<Shared>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            intake: self.intake.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Send + 'static> Dispatcher<P> {
    /// Launches `workers` workers plus one routing task and returns the
    /// handle feeding them.
    pub fn start<W: Workload<P>>(workers: usize, workload: W) -> Self {
        let (intake_tx, mut intake_rx) = mpsc::channel::<Task<P>>(INTAKE_CAPACITY);
        let (registry_tx, mut registry_rx) =
            mpsc::channel::<mpsc::Sender<Task<P>>>(REGISTRY_CAPACITY.max(workers));
        let (stop_tx, _) = watch::channel(false);
        let workload = Arc::new(workload);

        let mut worker_handles = Vec::with_capacity(workers);
        for id in 0..workers {
            worker_handles.push(spawn_worker(
                id,
                registry_tx.clone(),
                Arc::clone(&workload),
                stop_tx.subscribe(),
            ));
        }

        let mut stop_rx = stop_tx.subscribe();
        let router = tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming = intake_rx.recv() => {
                        let Some(task) = incoming else { break };
                        debug!("routing incoming task");
                        // Wait for a free worker; give up on the task if
                        // stop wins the race.
                        tokio::select! {
                            free = registry_rx.recv() => {
                                let Some(worker) = free else { break };
                                let _ = worker.send(task).await;
                            }
                            _ = stop_rx.changed() => break,
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("routing loop stopped");
        });

        Self {
            intake: intake_tx,
            shared: Arc::new(Shared {
                workers: Mutex::new(worker_handles),
                router: Mutex::new(Some(router)),
                stop: stop_tx,
            }),
        }
    }

    /// Enqueues a payload for the fleet.
    ///
    /// Blocks only when the intake channel is full, which is the natural
    /// backpressure towards producers.
    ///
    /// # Errors
    /// - `DispatchError::Closed` - dispatcher has been stopped
    pub async fn dispatch(&self, payload: P) -> Result<(), DispatchError> {
        let task = Task {
            payload,
            dispatcher: self.clone(),
        };
        self.intake
            .send(task)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Signals shutdown and waits until the routing loop and every worker
    /// have exited. Each worker finishes its current task first; tasks
    /// still buffered in the intake are dropped.
    pub async fn stop(&self) {
        let _ = self.shared.stop.send(true);

        let router = self
            .shared
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = router {
            let _ = handle.await;
        }

        let workers: Vec<_> = {
            let mut guard = self.shared.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}

fn spawn_worker<P: Send + 'static, W: Workload<P>>(
    id: usize,
    registry: mpsc::Sender<mpsc::Sender<Task<P>>>,
    workload: Arc<W>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(id, "started worker");
        let (task_tx, mut task_rx) = mpsc::channel::<Task<P>>(1);
        loop {
            // Publish ourselves as free before waiting for work.
            if registry.send(task_tx.clone()).await.is_err() {
                break;
            }
            tokio::select! {
                received = task_rx.recv() => {
                    let Some(task) = received else { break };
                    debug!(id, "got task");
                    if let Err(err) = workload.run(task).await {
                        error!(id, %err, "workload errored");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        info!(id, "stopped worker");
    })
}
