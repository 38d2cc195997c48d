//! Worker pool contract and an in-process implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   TileTask    ┌──────────────────┐
//! │ PipelineEngine │ ────────────► │    WorkerPool    │
//! │                │               │  (N workers run  │
//! │  reorder buf   │ ◄──────────── │   tasks)         │
//! └────────────────┘ TaskCompletion└──────────────────┘
//! ```
//!
//! A [`TileTask`] carries everything needed to process one tile: the tile,
//! the transform to apply and a reply channel. The pool only has to call
//! [`TileTask::run`]. A task that is dropped without running (pool shut
//! down, worker panicked) reports [`PipelineError::TaskLost`] through its
//! reply channel so the engine never waits forever.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, TransformError};
use crate::tile::{Tile, TileCoord};

use super::Transform;

type Work = Box<dyn FnOnce() -> Result<Tile, TransformError> + Send>;

// =============================================================================
// Messages
// =============================================================================

/// Result of one tile task.
#[derive(Debug)]
pub struct TaskCompletion {
    /// Position of the tile in enumeration order
    pub index: usize,
    pub coord: TileCoord,
    pub result: Result<Tile, PipelineError>,
}

/// One unit of distributed work: apply a transform to one tile.
pub struct TileTask {
    index: usize,
    coord: TileCoord,
    work: Option<Work>,
    reply: Option<mpsc::UnboundedSender<TaskCompletion>>,
}

impl TileTask {
    /// Create a task that applies `transform` to `tile` and reports on `reply`.
    pub fn new(
        index: usize,
        tile: Tile,
        transform: Arc<dyn Transform>,
        reply: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Self {
        let coord = tile.coord.clone();
        let work: Work = Box::new(move || {
            let mut tile = tile;
            transform.apply(&mut tile)?;
            Ok(tile)
        });
        Self {
            index,
            coord,
            work: Some(work),
            reply: Some(reply),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn coord(&self) -> &TileCoord {
        &self.coord
    }

    /// Run the work and send the result. Blocking; call it off the async
    /// executor (e.g. inside `spawn_blocking`).
    pub fn run(mut self) {
        if let Some(work) = self.work.take() {
            let coord = self.coord.clone();
            let result = work().map_err(|source| PipelineError::Transform { coord, source });
            self.complete(result);
        }
    }

    fn complete(&mut self, result: Result<Tile, PipelineError>) {
        if let Some(reply) = self.reply.take() {
            // The engine may have stopped listening (cancelled or failed run).
            let _ = reply.send(TaskCompletion {
                index: self.index,
                coord: self.coord.clone(),
                result,
            });
        }
    }
}

impl Drop for TileTask {
    fn drop(&mut self) {
        if self.reply.is_some() {
            let coord = self.coord.clone();
            self.complete(Err(PipelineError::TaskLost { coord }));
        }
    }
}

impl std::fmt::Debug for TileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileTask")
            .field("index", &self.index)
            .field("coord", &self.coord)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// WorkerPool
// =============================================================================

/// Executes tile tasks on behalf of the engine.
///
/// The engine only submits work; starting and stopping the pool is the
/// caller's business.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Hand a task to the pool. Fails with `PoolSubmission` if the pool can
    /// no longer accept work.
    async fn submit(&self, task: TileTask) -> Result<(), PipelineError>;
}

// =============================================================================
// TokioWorkerPool
// =============================================================================

/// A pool of tokio workers running tasks on the blocking thread pool.
///
/// # Lifecycle
///
/// 1. **Start**: [`start`](Self::start) spawns the workers
/// 2. **Operation**: engines submit tasks through [`WorkerPool::submit`]
/// 3. **Shutdown**: [`shutdown`](Self::shutdown) stops the workers; queued
///    tasks are dropped and report as lost
pub struct TokioWorkerPool {
    tx: mpsc::Sender<TileTask>,
    workers: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl TokioWorkerPool {
    /// Start a pool with `workers` workers (at least one).
    pub fn start(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<TileTask>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));
        let shutdown_token = CancellationToken::new();

        let handles = (0..workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let token = shutdown_token.clone();
                tokio::spawn(async move { worker_loop(id, rx, token).await })
            })
            .collect();

        info!(workers, "Started worker pool");

        Self {
            tx,
            workers: handles,
            shutdown_token,
        }
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// Tasks already running finish; queued tasks are dropped.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        drop(self.tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<TileTask>>>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => None,
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };

        let index = task.index();
        let coord = task.coord().clone();
        debug!(worker = id, index, coord = %coord, "Running tile task");

        // A panic inside the task drops it, which reports the task as lost.
        if let Err(e) = tokio::task::spawn_blocking(move || task.run()).await {
            warn!(worker = id, coord = %coord, error = %e, "Tile task panicked");
        }
    }
    debug!(worker = id, "Worker exiting");
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    async fn submit(&self, task: TileTask) -> Result<(), PipelineError> {
        self.tx
            .send(task)
            .await
            .map_err(|_| PipelineError::PoolSubmission("worker pool is shut down".to_string()))
    }
}
