//! Slide facade.
//!
//! A [`Slide`] ties together the pieces a caller normally handles as one
//! entity: a decoder for the raw pixels, the tile grid laid over them, the
//! persistent store and the pipeline engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                  Slide                  │
//! │  (lifecycle, run, stitch, masks)        │
//! └──────┬──────────────┬───────────────┬───┘
//!        │              │               │
//!        ▼              ▼               ▼
//! ┌─────────────┐ ┌───────────┐ ┌────────────────┐
//! │  Decoder +  │ │   Store   │ │ PipelineEngine │
//! │  TileGrid   │ │           │ │                │
//! │ (GridSource)│ │           │ │                │
//! └─────────────┘ └───────────┘ └────────────────┘
//! ```
//!
//! A slide created from a decoder reads its tiles from the decoder on every
//! run. A reopened slide has no decoder and runs over the tiles already in
//! its container.
//!
//! # Usage
//!
//! ```ignore
//! use wsi_tilestore::slide::{ImageDecoder, Slide, SlideOptions};
//! use wsi_tilestore::pipeline::Scheduling;
//!
//! let decoder = ImageDecoder::open("scan.png").await?;
//! let slide = Slide::create("scan.wsit", "scan", decoder, SlideOptions::new(256)).await?;
//! slide.ingest(Scheduling::Local).await?;
//! slide.close().await?;
//! ```

mod decoder;
mod image_decoder;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::array::NdArray;
use crate::error::{DecodeError, PipelineError, SlideError, StoreError};
use crate::pipeline::{Pipeline, PipelineEngine, RunSummary, Scheduling, TileSource, Transform};
use crate::store::{LabelValue, Labels, MaskCollection, Scope, SlideMetadata, Store};
use crate::tile::{Canvas, Extent, Region, Tile, TileCoord, TileGrid};

pub use decoder::{ArrayDecoder, Decoder};
pub use image_decoder::{
    clamp_quality, encode_jpeg, encode_png, ImageDecoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};

// =============================================================================
// GridSource
// =============================================================================

/// Tiles read from a decoder over a grid.
///
/// Each tile is read once from its clipped read region and zero-padded up to
/// the full tile size, so every tile has the same shape.
pub struct GridSource<'a> {
    decoder: &'a dyn Decoder,
    grid: &'a TileGrid,
    level: usize,
}

impl<'a> GridSource<'a> {
    pub fn new(decoder: &'a dyn Decoder, grid: &'a TileGrid, level: usize) -> Self {
        Self {
            decoder,
            grid,
            level,
        }
    }

    async fn read(&self, coord: &TileCoord) -> Result<NdArray, DecodeError> {
        let entry = self
            .grid
            .entry_for(coord)
            .ok_or_else(|| DecodeError::RegionOutOfBounds {
                region: format!("tile {}", coord),
                shape: self.grid.shape().to_vec(),
            })?;

        let pixels = self.decoder.read_region(&entry.read, self.level).await?;

        let mut expected = entry.read.size.clone();
        expected.extend_from_slice(self.decoder.trailing_dims());
        if pixels.shape() != expected.as_slice() || pixels.dtype() != self.decoder.dtype() {
            return Err(DecodeError::InvalidArray(format!(
                "decoder returned {} {:?} for region {}, expected {} {:?}",
                pixels.dtype(),
                pixels.shape(),
                entry.read,
                self.decoder.dtype(),
                expected
            )));
        }

        pixels
            .pad_to(&entry.canvas.size)
            .map_err(|e| DecodeError::InvalidArray(e.to_string()))
    }
}

#[async_trait]
impl TileSource for GridSource<'_> {
    async fn coords(&self) -> Result<Vec<TileCoord>, PipelineError> {
        Ok(self.grid.coords())
    }

    async fn load(&self, coord: &TileCoord) -> Result<Tile, PipelineError> {
        let pixels = self
            .read(coord)
            .await
            .map_err(|source| PipelineError::Decode {
                coord: coord.clone(),
                source,
            })?;
        Ok(Tile::new(coord.clone(), pixels))
    }
}

// =============================================================================
// SlideOptions
// =============================================================================

/// Parameters for creating a slide from a decoder.
#[derive(Debug, Clone)]
pub struct SlideOptions {
    /// Tile extent, uniform or per axis
    pub tile_size: Extent,
    /// Step between tile origins; defaults to the tile size
    pub stride: Option<Extent>,
    /// Keep partial edge tiles, zero-padded to the full tile size
    pub padding: bool,
    /// Pyramid level to tile
    pub level: usize,
    /// Replace an existing container at the target path
    pub overwrite: bool,
    /// Slide-scoped labels written at creation
    pub labels: Labels,
    /// Lock the tile schema to the decoder's output at creation. Otherwise
    /// the first committed tile fixes it.
    pub declare_schema: bool,
}

impl SlideOptions {
    pub fn new(tile_size: impl Into<Extent>) -> Self {
        Self {
            tile_size: tile_size.into(),
            stride: None,
            padding: false,
            level: 0,
            overwrite: false,
            labels: Labels::new(),
            declare_schema: false,
        }
    }

    pub fn with_stride(mut self, stride: impl Into<Extent>) -> Self {
        self.stride = Some(stride.into());
        self
    }

    pub fn with_padding(mut self, padding: bool) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_declared_schema(mut self, declare: bool) -> Self {
        self.declare_schema = declare;
        self
    }

    /// Build the grid these options lay over a slide of `shape`.
    pub fn grid(&self, shape: &[usize]) -> Result<TileGrid, SlideError> {
        let grid = TileGrid::new(shape.to_vec(), self.tile_size.clone())?;
        let grid = match &self.stride {
            Some(stride) => grid.with_stride(stride.clone())?,
            None => grid,
        };
        Ok(grid.with_padding(self.padding))
    }
}

// =============================================================================
// Slide
// =============================================================================

/// A slide backed by a persistent container.
pub struct Slide {
    store: Store,
    grid: Option<TileGrid>,
    decoder: Option<Arc<dyn Decoder>>,
    level: usize,
}

impl Slide {
    /// Create a container for a decoded slide.
    ///
    /// `options.labels` are stored as slide labels. The tile schema is left
    /// open for the first committed tile unless `options.declare_schema` is
    /// set, in which case it is the tile size followed by the decoder's
    /// trailing dims. No tiles are read until [`run`](Self::run) or
    /// [`ingest`](Self::ingest).
    pub async fn create(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        decoder: impl Decoder + 'static,
        options: SlideOptions,
    ) -> Result<Self, SlideError> {
        Self::create_shared(path, name, Arc::new(decoder), options).await
    }

    /// [`create`](Self::create) with a shared decoder.
    pub async fn create_shared(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        decoder: Arc<dyn Decoder>,
        options: SlideOptions,
    ) -> Result<Self, SlideError> {
        let shape = decoder
            .level_shape(options.level)
            .ok_or(DecodeError::InvalidLevel {
                level: options.level,
                count: decoder.level_count(),
            })?;
        let grid = options.grid(&shape)?;

        let mut metadata = SlideMetadata::new(name, shape);
        if options.declare_schema {
            let mut tile_shape = grid.tile_size().to_vec();
            tile_shape.extend_from_slice(decoder.trailing_dims());
            metadata = metadata.with_tile_schema(tile_shape, decoder.dtype());
        }

        let store = Store::create(path, metadata, options.overwrite).await?;
        for (key, value) in options.labels.iter() {
            store.put_label(&Scope::Slide, key, value.clone()).await?;
        }

        info!(
            shape = ?grid.shape(),
            tile_size = ?grid.tile_size(),
            stride = ?grid.stride(),
            padded = grid.is_padded(),
            tiles = grid.len(),
            "Created slide"
        );

        Ok(Self {
            store,
            grid: Some(grid),
            decoder: Some(decoder),
            level: options.level,
        })
    }

    /// Reopen a slide from its container.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        let store = Store::open(path).await?;
        Ok(Self {
            store,
            grid: None,
            decoder: None,
            level: 0,
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The tile grid; `None` for a reopened slide.
    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    pub async fn name(&self) -> String {
        self.store.metadata().await.name
    }

    /// Spatial shape of the slide.
    pub async fn shape(&self) -> Vec<usize> {
        self.store.metadata().await.shape
    }

    /// Slide-scoped labels.
    pub async fn labels(&self) -> Result<Labels, SlideError> {
        Ok(self.store.labels(&Scope::Slide).await?)
    }

    /// Set a slide-scoped label.
    pub async fn put_label(
        &self,
        key: &str,
        value: impl Into<LabelValue>,
    ) -> Result<(), SlideError> {
        Ok(self.store.put_label(&Scope::Slide, key, value).await?)
    }

    /// Slide-scoped masks.
    pub fn masks(&self) -> MaskCollection<'_> {
        self.store.masks(Scope::Slide)
    }

    /// Masks of one tile.
    pub fn tile_masks(&self, coord: impl Into<TileCoord>) -> MaskCollection<'_> {
        self.store.masks(Scope::Tile(coord.into()))
    }

    /// Run `transform` over every tile and commit the results.
    pub async fn run(
        &self,
        transform: impl Transform + 'static,
        scheduling: Scheduling<'_>,
    ) -> Result<RunSummary, SlideError> {
        self.run_with(&PipelineEngine::new(transform), scheduling)
            .await
    }

    /// Run a configured engine over every tile.
    ///
    /// Tiles come from the decoder when the slide has one, otherwise from
    /// the container.
    pub async fn run_with(
        &self,
        engine: &PipelineEngine,
        scheduling: Scheduling<'_>,
    ) -> Result<RunSummary, SlideError> {
        let summary = match (&self.decoder, &self.grid) {
            (Some(decoder), Some(grid)) => {
                let source = GridSource::new(decoder.as_ref(), grid, self.level);
                engine.run(&source, &self.store, scheduling).await?
            }
            _ => engine.run(&self.store, &self.store, scheduling).await?,
        };
        Ok(summary)
    }

    /// Store every tile unchanged.
    pub async fn ingest(&self, scheduling: Scheduling<'_>) -> Result<RunSummary, SlideError> {
        self.run(Pipeline::named("ingest"), scheduling)
            .await
    }

    /// Rebuild `window` of the slide canvas from the stored tiles.
    ///
    /// Tiles are painted in commit order, so where tiles overlap the later
    /// one wins. Padding and parts of the window outside the slide stay zero.
    pub async fn stitch(&self, window: Region) -> Result<NdArray, SlideError> {
        let metadata = self.store.metadata().await;
        let schema = metadata
            .tile_schema
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("tile schema (no tiles stored)".to_string()))?;

        let ndim = metadata.ndim();
        if window.ndim() != ndim {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{}-d window", ndim),
                actual: format!("{}-d window {}", window.ndim(), window),
            }
            .into());
        }
        let (spatial, trailing) = schema.tile_shape.split_at(ndim);

        let mut canvas = Canvas::new(window, &metadata.shape, trailing, schema.dtype);
        let mut painted = 0;
        for coord in self.store.tile_coords().await {
            let region = Region::new(coord.as_slice().to_vec(), spatial.to_vec());
            if region.intersect(canvas.window()).is_none() {
                continue;
            }
            let (pixels, _) = self.store.get_tile(&coord).await?;
            canvas.paint(&region, &pixels)?;
            painted += 1;
        }
        debug!(window = %canvas.window(), tiles = painted, "Stitched window");

        Ok(canvas.into_array()?)
    }

    /// Rebuild the whole slide.
    pub async fn stitch_all(&self) -> Result<NdArray, SlideError> {
        let shape = self.shape().await;
        self.stitch(Region::full(&shape)).await
    }

    /// Flush and release the container.
    pub async fn close(self) -> Result<(), SlideError> {
        Ok(self.store.close().await?)
    }
}
