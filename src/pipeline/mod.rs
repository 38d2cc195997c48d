//! Tile processing pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  load   ┌────────────────┐  commit  ┌─────────┐
//! │  TileSource  │ ──────► │ PipelineEngine │ ───────► │  Store  │
//! │ (decoder or  │         │  Local or      │          │         │
//! │  store)      │         │  Distributed   │          │         │
//! └──────────────┘         └───────┬────────┘          └─────────┘
//!                                  │ TileTask
//!                                  ▼
//!                          ┌────────────────┐
//!                          │   WorkerPool   │
//!                          └────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Transform`] / [`Pipeline`]: per-tile operations, composable
//! - [`TileSource`]: where tiles come from (a decoder over a grid, or a store)
//! - [`PipelineEngine`]: runs a transform over a source under a [`Scheduling`]
//!   model and commits results in enumeration order
//! - [`WorkerPool`] / [`TokioWorkerPool`]: the distributed execution contract
//!   and an in-process implementation of it

mod engine;
mod pool;
mod transform;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::store::Store;
use crate::tile::{Tile, TileCoord};

pub use engine::{PipelineEngine, RunSummary, Scheduling, DEFAULT_MAX_IN_FLIGHT};
pub use pool::{TaskCompletion, TileTask, TokioWorkerPool, WorkerPool};
pub use transform::{from_fn, FnTransform, Pipeline, Transform};

/// Where the engine gets tiles from.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Coordinates to process, in enumeration order.
    async fn coords(&self) -> Result<Vec<TileCoord>, PipelineError>;

    /// Load one tile.
    async fn load(&self, coord: &TileCoord) -> Result<Tile, PipelineError>;
}

/// Re-processing an existing container: tiles in insertion order, loaded
/// with their masks and labels.
#[async_trait]
impl TileSource for Store {
    async fn coords(&self) -> Result<Vec<TileCoord>, PipelineError> {
        Ok(self.tile_coords().await)
    }

    async fn load(&self, coord: &TileCoord) -> Result<Tile, PipelineError> {
        Ok(self.load_tile(coord).await?)
    }
}
