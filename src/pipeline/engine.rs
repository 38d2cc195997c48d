use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::store::Store;
use crate::tile::{Tile, TileCoord};

use super::pool::{TileTask, WorkerPool};
use super::{TileSource, Transform};

/// Default bound on tiles loaded but not yet committed, whether running on
/// the pool or waiting in the reorder buffer.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// How the engine executes transforms.
#[derive(Clone, Copy)]
pub enum Scheduling<'a> {
    /// One tile at a time, in enumeration order, on the calling task
    Local,
    /// Per-tile work is handed to a caller-owned worker pool
    Distributed(&'a dyn WorkerPool),
}

impl Scheduling<'_> {
    fn name(&self) -> &'static str {
        match self {
            Scheduling::Local => "local",
            Scheduling::Distributed(_) => "distributed",
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub tiles_committed: usize,
    pub duration: Duration,
}

/// Applies a transform to every tile of a source and commits the results.
///
/// # Ordering
///
/// Commits always happen in enumeration order, in both scheduling modes. In
/// distributed mode finished tiles wait in a reorder buffer until every
/// earlier tile has been committed.
///
/// # Failure
///
/// The run is fail-fast. On the first failure the engine stops submitting
/// work, keeps committing the tiles enumerated before the failing one, and
/// then returns the error. The store therefore ends with exactly the tiles
/// before the lowest failing index, whichever mode ran. The failing tile and
/// everything after it are never committed.
///
/// # Cancellation
///
/// Cancelling the token stops submissions and commits at once. Tiles already
/// committed stay; in-flight results are discarded.
pub struct PipelineEngine {
    transform: Arc<dyn Transform>,
    max_in_flight: usize,
    cancel: CancellationToken,
}

impl PipelineEngine {
    pub fn new(transform: impl Transform + 'static) -> Self {
        Self::from_arc(Arc::new(transform))
    }

    pub fn from_arc(transform: Arc<dyn Transform>) -> Self {
        Self {
            transform,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound the number of tiles held between load and commit (at least 1).
    ///
    /// A slow tile at the head of the order stalls submission once the
    /// window is full, so memory stays bounded.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Use `token` to cancel runs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this engine's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the transform over every tile of `source`, committing to `store`.
    ///
    /// The store is flushed when the run ends, successfully or not.
    pub async fn run<S>(
        &self,
        source: &S,
        store: &Store,
        scheduling: Scheduling<'_>,
    ) -> Result<RunSummary, PipelineError>
    where
        S: TileSource + ?Sized,
    {
        let coords = source.coords().await?;
        let started = Instant::now();
        info!(
            tiles = coords.len(),
            transform = self.transform.name(),
            mode = scheduling.name(),
            "Starting pipeline run"
        );

        let mut committed = 0;
        let result = match scheduling {
            Scheduling::Local => self.run_local(source, store, &coords, &mut committed).await,
            Scheduling::Distributed(pool) => {
                self.run_distributed(source, store, pool, &coords, &mut committed)
                    .await
            }
        };
        let flushed = store.flush().await;

        match result {
            Ok(()) => {
                flushed?;
                let summary = RunSummary {
                    tiles_committed: committed,
                    duration: started.elapsed(),
                };
                info!(
                    tiles = summary.tiles_committed,
                    elapsed_ms = summary.duration.as_millis() as u64,
                    "Pipeline run complete"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "Failed to flush store after aborted run");
                }
                warn!(error = %e, committed, "Pipeline run aborted");
                Err(e)
            }
        }
    }

    async fn run_local<S>(
        &self,
        source: &S,
        store: &Store,
        coords: &[TileCoord],
        committed: &mut usize,
    ) -> Result<(), PipelineError>
    where
        S: TileSource + ?Sized,
    {
        for (index, coord) in coords.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let mut tile = source.load(coord).await?;
            self.transform
                .apply(&mut tile)
                .map_err(|source| PipelineError::Transform {
                    coord: coord.clone(),
                    source,
                })?;
            store.commit_tile(tile).await?;
            *committed += 1;
            debug!(index, coord = %coord, "Committed tile");
        }
        Ok(())
    }

    async fn run_distributed<S>(
        &self,
        source: &S,
        store: &Store,
        pool: &dyn WorkerPool,
        coords: &[TileCoord],
        committed: &mut usize,
    ) -> Result<(), PipelineError>
    where
        S: TileSource + ?Sized,
    {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let mut next_submit = 0;
        let mut next_commit = 0;
        let mut in_flight = 0;
        let mut ready: BTreeMap<usize, Tile> = BTreeMap::new();
        let mut failure: Failure = None;

        loop {
            // Submit while the window has room and nothing has failed.
            while failure.is_none()
                && next_submit < coords.len()
                && next_submit - next_commit < self.max_in_flight
            {
                if self.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let index = next_submit;
                next_submit += 1;

                match source.load(&coords[index]).await {
                    Ok(tile) => {
                        let transform = Arc::clone(&self.transform);
                        let task = TileTask::new(index, tile, transform, reply_tx.clone());
                        in_flight += 1;
                        // A rejected task is dropped and reports itself lost; the
                        // submission error recorded here takes precedence.
                        if let Err(e) = pool.submit(task).await {
                            record_failure(&mut failure, index, e);
                        }
                    }
                    Err(e) => record_failure(&mut failure, index, e),
                }
            }

            // Commit the ready prefix.
            while let Some(tile) = ready.remove(&next_commit) {
                if self.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let coord = tile.coord.clone();
                store.commit_tile(tile).await?;
                *committed += 1;
                debug!(index = next_commit, coord = %coord, "Committed tile");
                next_commit += 1;
            }

            if let Some(index) = failure.as_ref().map(|(i, _)| *i) {
                if next_commit >= index {
                    if let Some((_, e)) = failure.take() {
                        return Err(e);
                    }
                }
            } else if next_commit == coords.len() {
                return Ok(());
            }

            if in_flight == 0 {
                // Everything submitted has been committed: either the window
                // has room again or the failure index is reached.
                match failure {
                    Some((_, e)) => return Err(e),
                    None if next_submit < coords.len() => continue,
                    None => return Ok(()),
                }
            }

            let completion = tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                completion = reply_rx.recv() => completion,
            };
            // We hold a sender, so the channel cannot close.
            let Some(completion) = completion else {
                return Err(PipelineError::Cancelled);
            };
            in_flight -= 1;

            match completion.result {
                Ok(tile) => {
                    let before_failure = failure
                        .as_ref()
                        .map_or(true, |(index, _)| completion.index < *index);
                    if before_failure {
                        ready.insert(completion.index, tile);
                    }
                }
                Err(e) => {
                    record_failure(&mut failure, completion.index, e);
                    if let Some((index, _)) = &failure {
                        ready.retain(|&i, _| i < *index);
                    }
                }
            }
        }
    }
}

/// Lowest failing index and its error.
type Failure = Option<(usize, PipelineError)>;

fn record_failure(failure: &mut Failure, index: usize, error: PipelineError) {
    let lower = failure.as_ref().map_or(true, |(current, _)| index < *current);
    if lower {
        debug!(index, error = %error, "Tile failed");
        *failure = Some((index, error));
    }
}
