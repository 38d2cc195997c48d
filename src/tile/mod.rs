//! Tiles and the tile grid.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                TileGrid                 │
//! │  (shape, tile size, stride, padding →   │
//! │   ordered origins + regions)            │
//! └────────────────────┬────────────────────┘
//!                      │ GridEntry
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                  Tile                   │
//! │  (coord, pixels, masks, labels, counts) │
//! └────────────────────┬────────────────────┘
//!                      │ commit order
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                 Canvas                  │
//! │  (last write wins, padding discarded)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCoord`]: origin of a tile on the slide canvas, one component per grid axis
//! - [`TileGrid`]: pure computation of tile origins, read regions and canvas regions
//! - [`Tile`]: a tile's pixels with its masks, labels and per-object counts
//! - [`Masks`]: detached, ordered mask set carried by a tile through a pipeline
//! - [`Canvas`]: reconstruction of a window of the slide from tiles

mod coord;
mod grid;
mod stitch;

use crate::array::NdArray;
use crate::error::StoreError;
use crate::store::{check_mask, Labels, Table};

pub use coord::TileCoord;
pub use grid::{Extent, GridEntry, Region, TileGrid};
pub use stitch::Canvas;

// =============================================================================
// Tile
// =============================================================================

/// A tile: pixel data at a fixed origin plus everything derived from it.
///
/// This is the unit of work of the pipeline. A transform receives the tile by
/// mutable reference and may replace the pixels, add or remove masks, set
/// labels and emit per-object counts rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Origin of the tile on the slide canvas
    pub coord: TileCoord,

    /// Pixel array; the leading axes are the tile's spatial extent
    pub image: NdArray,

    /// Tile-scoped masks
    pub masks: Masks,

    /// Tile-scoped labels
    pub labels: Labels,

    /// Per-object measurements produced for this tile (appended to the
    /// slide's obs table on commit)
    pub counts: Option<Table>,
}

impl Tile {
    /// Create a tile with no masks, labels or counts.
    pub fn new(coord: impl Into<TileCoord>, image: NdArray) -> Self {
        Self {
            coord: coord.into(),
            image,
            masks: Masks::new(),
            labels: Labels::new(),
            counts: None,
        }
    }

    /// Attach labels.
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Spatial extent of the tile (the image's leading axes).
    pub fn spatial_shape(&self) -> &[usize] {
        let k = self.coord.ndim().min(self.image.ndim());
        &self.image.shape()[..k]
    }
}

// =============================================================================
// Masks
// =============================================================================

/// Ordered, in-memory set of masks belonging to one tile.
///
/// Enforces the same rules as the store's mask namespace: non-empty keys,
/// integer dtypes, explicit insert vs. overwrite. Insertion order is kept and
/// is the order masks are persisted in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Masks {
    entries: Vec<(String, NdArray)>,
}

impl Masks {
    /// Create an empty mask set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new mask; fails with `DuplicateKey` if `key` exists.
    pub fn add(&mut self, key: impl Into<String>, mask: NdArray) -> Result<(), StoreError> {
        let key = key.into();
        check_mask(&key, &mask)?;
        if self.contains(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        self.entries.push((key, mask));
        Ok(())
    }

    /// Insert or overwrite a mask, keeping the position of an existing key.
    pub fn update(&mut self, key: impl Into<String>, mask: NdArray) -> Result<(), StoreError> {
        let key = key.into();
        check_mask(&key, &mask)?;
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = mask,
            None => self.entries.push((key, mask)),
        }
        Ok(())
    }

    /// Get a mask by key.
    pub fn get(&self, key: &str) -> Option<&NdArray> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a mask; fails with `NotFound` if absent.
    pub fn remove(&mut self, key: &str) -> Result<NdArray, StoreError> {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| StoreError::NotFound(format!("mask '{}'", key)))?;
        Ok(self.entries.remove(pos).1)
    }

    /// Whether a mask with `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Mask keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Iterate `(key, mask)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NdArray)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of masks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no masks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
