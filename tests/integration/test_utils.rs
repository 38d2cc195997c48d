//! Test utilities for integration tests.
//!
//! This module provides synthetic slides, a decoder that counts its reads,
//! and transforms whose output depends on tile content.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use wsi_tilestore::array::{DType, NdArray};
use wsi_tilestore::error::DecodeError;
use wsi_tilestore::pipeline::{from_fn, Transform};
use wsi_tilestore::slide::{ArrayDecoder, Decoder};
use wsi_tilestore::store::{Column, Store, Table};
use wsi_tilestore::tile::{Region, Tile, TileCoord};

// =============================================================================
// Synthetic slides
// =============================================================================

/// A `[h, w, channels]` u8 slide where every pixel differs from its
/// neighbours.
pub fn rgb_slide(h: usize, w: usize, channels: usize) -> NdArray {
    let values: Vec<u8> = (0..h * w * channels)
        .map(|i| ((i * 7 + i / channels * 13) % 256) as u8)
        .collect();
    NdArray::from_vec(vec![h, w, channels], values).unwrap()
}

/// A `[h, w]` u16 slide with value `row * w + col`.
pub fn gray_slide(h: usize, w: usize) -> NdArray {
    NdArray::from_vec(vec![h, w], (0..(h * w) as u16).collect::<Vec<_>>()).unwrap()
}

/// A fresh scratch directory and a container path inside it.
pub fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.wsit", name));
    (dir, path)
}

// =============================================================================
// Counting decoder
// =============================================================================

/// Wraps an [`ArrayDecoder`] and records every region read.
#[derive(Clone)]
pub struct CountingDecoder {
    inner: ArrayDecoder,
    reads: Arc<AtomicUsize>,
}

impl CountingDecoder {
    pub fn new(array: NdArray, spatial_ndim: usize) -> Self {
        Self {
            inner: ArrayDecoder::new(array, spatial_ndim).unwrap(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decoder for CountingDecoder {
    fn shape(&self) -> &[usize] {
        self.inner.shape()
    }

    fn trailing_dims(&self) -> &[usize] {
        self.inner.trailing_dims()
    }

    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    async fn read_region(&self, region: &Region, level: usize) -> Result<NdArray, DecodeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_region(region, level).await
    }
}

// =============================================================================
// Transforms
// =============================================================================

fn tile_sum(tile: &Tile) -> u64 {
    tile.image.data().iter().map(|&b| b as u64).sum()
}

/// Adds a tile-dependent offset to every u8 pixel, so overlapping tiles
/// disagree on shared pixels.
pub fn shift_by_content() -> impl Transform {
    from_fn("shift", |tile: &mut Tile| {
        let shift = (tile_sum(tile) % 97) as u8 + 1;
        tile.image = tile
            .image
            .map(|v: u8| v.wrapping_add(shift))
            .map_err(|e| e.to_string())?;
        Ok(())
    })
}

/// Sets a `mean` float label and a `sum` int label.
pub fn describe() -> impl Transform {
    from_fn("describe", |tile: &mut Tile| {
        let sum = tile_sum(tile);
        let mean = sum as f64 / tile.image.data().len().max(1) as f64;
        tile.labels.insert("mean", mean).map_err(|e| e.to_string())?;
        tile.labels.insert("sum", sum as i64).map_err(|e| e.to_string())?;
        Ok(())
    })
}

/// Adds a `bright` u8 mask over the tile's spatial shape: 1 where the first
/// channel exceeds `threshold`.
pub fn threshold_mask(threshold: u8) -> impl Transform {
    from_fn("threshold", move |tile: &mut Tile| {
        let spatial = tile.spatial_shape().to_vec();
        let pixels: usize = spatial.iter().product();
        let channels = tile.image.len() / pixels.max(1);
        let data = tile.image.data();
        let mask: Vec<u8> = (0..pixels)
            .map(|p| u8::from(data[p * channels] > threshold))
            .collect();
        let mask = NdArray::from_vec(spatial, mask).map_err(|e| e.to_string())?;
        tile.masks.update("bright", mask).map_err(|e| e.to_string())
    })
}

/// Emits one obs row per tile, keyed by the tile coordinate.
pub fn count_rows() -> impl Transform {
    from_fn("count", |tile: &mut Tile| {
        let sum = tile_sum(tile);
        let rows = Table::new(vec![tile.coord.to_string()])
            .and_then(|t| t.with_column("sum", Column::Int(vec![sum as i64])))
            .and_then(|t| t.with_column("even", Column::Bool(vec![sum % 2 == 0])))
            .map_err(|e| e.to_string())?;
        tile.counts = Some(rows);
        Ok(())
    })
}

/// Fails on the tile at `coord`.
pub fn fail_at(coord: impl Into<TileCoord>) -> impl Transform {
    let coord = coord.into();
    from_fn("fail", move |tile: &mut Tile| {
        if tile.coord == coord {
            Err(format!("refusing tile {}", tile.coord))
        } else {
            Ok(())
        }
    })
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert two stores hold the same tiles, masks, labels and counts.
pub async fn assert_same_contents(a: &Store, b: &Store) {
    let coords = a.tile_coords().await;
    assert_eq!(coords, b.tile_coords().await, "tile order differs");
    for coord in &coords {
        assert_eq!(
            a.load_tile(coord).await.unwrap(),
            b.load_tile(coord).await.unwrap(),
            "tile {} differs",
            coord
        );
    }
    assert_eq!(a.get_counts().await, b.get_counts().await, "counts differ");
    assert_eq!(a.metadata().await, b.metadata().await, "metadata differs");
}
