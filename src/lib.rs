//! # WSI Tile Store
//!
//! Tile, store and process Whole Slide Images in a single persistent container.
//!
//! A slide is laid out as a grid of tiles (optionally overlapping, optionally
//! padded at the edges). Each tile is stored together with its masks and
//! labels, and per-object measurements go into obs/var count tables. A
//! pipeline of transforms runs over every tile, either one at a time or on a
//! worker pool, and writes results back in grid order so both scheduling
//! models leave identical containers.
//!
//! ## Features
//!
//! - **Tile grid**: n-dimensional grids with stride and padding, plus
//!   reconstruction of any window from stored tiles
//! - **Exact persistence**: arrays round-trip byte for byte, floats bit for bit
//! - **Append-only container**: every flush appends a digest-checked manifest,
//!   so a crash never leaves a half-written index
//! - **Deterministic pipelines**: local and distributed runs commit in the
//!   same order and stop at the same tile on failure
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`array`] - Dense n-dimensional arrays
//! - [`tile`] - Tile grid, tiles and stitching
//! - [`store`] - Persistent store with tiles, masks, labels and counts
//! - [`mod@format`] - On-disk container layout
//! - [`io`] - Range reads and block caching over the container file
//! - [`pipeline`] - Transforms, worker pools and the pipeline engine
//! - [`slide`] - Decoders and the slide facade
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_tilestore::array::{DType, NdArray};
//! use wsi_tilestore::pipeline::{from_fn, Scheduling};
//! use wsi_tilestore::slide::{ArrayDecoder, Slide, SlideOptions};
//! use wsi_tilestore::tile::Tile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pixels = NdArray::zeros(DType::U8, vec![1024, 1024, 3]);
//!     let decoder = ArrayDecoder::new(pixels, 2)?;
//!
//!     let options = SlideOptions::new(256).with_stride(192).with_padding(true);
//!     let slide = Slide::create("slide.wsit", "example", decoder, options).await?;
//!
//!     let mark = from_fn("mark", |tile: &mut Tile| {
//!         tile.labels.insert("seen", true).map(|_| ()).map_err(|e| e.to_string())
//!     });
//!     slide.run(mark, Scheduling::Local).await?;
//!     slide.close().await?;
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod slide;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use array::{DType, Element, NdArray};
pub use config::{Cli, Command, ExportConfig, InspectConfig, TileConfig};
pub use error::{
    DecodeError, GridError, IoError, PipelineError, SlideError, StoreError, TransformError,
};
pub use pipeline::{
    from_fn, Pipeline, PipelineEngine, RunSummary, Scheduling, TileSource, TileTask,
    TokioWorkerPool, Transform, WorkerPool,
};
pub use slide::{ArrayDecoder, Decoder, ImageDecoder, Slide, SlideOptions};
pub use store::{
    Column, Counts, LabelValue, Labels, MaskCollection, Scope, SlideMetadata, Store, Table,
};
pub use tile::{Canvas, Extent, Masks, Region, Tile, TileCoord, TileGrid};
