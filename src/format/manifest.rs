//! The container manifest: the JSON index over the blob region.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::array::DType;
use crate::error::StoreError;
use crate::store::Labels;
use crate::tile::TileCoord;

use super::HEADER_SIZE;

/// Location of a blob in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub offset: u64,
    pub len: u64,
}

/// A stored array: its dtype and shape plus where its bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRecord {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub blob: BlobRef,
}

/// A named mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRecord {
    pub key: String,
    pub array: ArrayRecord,
}

/// A stored tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub coord: TileCoord,
    pub pixels: ArrayRecord,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub masks: Vec<MaskRecord>,
    /// Obs row ids this tile contributed to the slide's counts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obs_rows: Vec<String>,
}

/// Shape and dtype every tile of a slide must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSchema {
    /// Full tile array shape: spatial extent followed by trailing dims
    pub tile_shape: Vec<usize>,
    pub dtype: DType,
}

/// Slide-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideMetadata {
    pub name: String,

    /// Spatial extent per grid axis
    pub shape: Vec<usize>,

    /// Declared at creation or fixed by the first stored tile
    #[serde(default)]
    pub tile_schema: Option<TileSchema>,
}

impl SlideMetadata {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            tile_schema: None,
        }
    }

    /// Declare the tile schema up front.
    pub fn with_tile_schema(mut self, tile_shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        self.tile_schema = Some(TileSchema {
            tile_shape: tile_shape.into(),
            dtype,
        });
        self
    }

    /// Number of grid axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Check the metadata is usable for a slide.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.shape.is_empty() {
            return Err(StoreError::ShapeMismatch {
                expected: "at least one spatial axis".to_string(),
                actual: "[]".to_string(),
            });
        }
        if let Some(schema) = &self.tile_schema {
            if schema.tile_shape.len() < self.shape.len() {
                return Err(StoreError::ShapeMismatch {
                    expected: format!("tile shape with at least {} axes", self.shape.len()),
                    actual: format!("{:?}", schema.tile_shape),
                });
            }
        }
        Ok(())
    }
}

/// The full container index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub slide: SlideMetadata,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub masks: Vec<MaskRecord>,
    /// Tiles in insertion order
    #[serde(default)]
    pub tiles: Vec<TileRecord>,
    #[serde(default)]
    pub counts: Option<BlobRef>,
}

impl Manifest {
    /// An empty manifest for a new slide.
    pub fn new(slide: SlideMetadata) -> Self {
        Self {
            slide,
            labels: Labels::new(),
            masks: Vec::new(),
            tiles: Vec::new(),
            counts: None,
        }
    }

    pub(crate) fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self)
            .map_err(|e| StoreError::CorruptContainer(format!("encoding manifest: {}", e)))
    }

    pub(crate) fn from_json(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptContainer(format!("decoding manifest: {}", e)))
    }

    /// Check internal consistency of a decoded manifest.
    ///
    /// Every blob must lie in `[HEADER_SIZE, blob_end)`, tile coordinates must
    /// be unique with one component per grid axis, and mask and label keys
    /// must be non-empty and unique within their scope.
    pub fn validate(&self, blob_end: u64) -> Result<(), StoreError> {
        let corrupt = |what: String| StoreError::CorruptContainer(what);

        self.slide
            .validate()
            .map_err(|e| corrupt(format!("slide metadata: {}", e)))?;
        self.labels
            .validate()
            .map_err(|e| corrupt(format!("slide labels: {}", e)))?;

        let check_blob = |blob: &BlobRef| -> Result<(), StoreError> {
            let ok = blob.offset >= HEADER_SIZE as u64
                && blob
                    .offset
                    .checked_add(blob.len)
                    .is_some_and(|end| end <= blob_end);
            if ok {
                Ok(())
            } else {
                Err(corrupt(format!(
                    "blob {}+{} outside blob region",
                    blob.offset, blob.len
                )))
            }
        };
        let check_array = |array: &ArrayRecord| -> Result<(), StoreError> {
            check_blob(&array.blob)?;
            let expected = array.shape.iter().product::<usize>() as u64 * array.dtype.size() as u64;
            if expected != array.blob.len {
                return Err(corrupt(format!(
                    "array {} {:?} stored in {} bytes",
                    array.dtype, array.shape, array.blob.len
                )));
            }
            Ok(())
        };
        let check_masks = |masks: &[MaskRecord]| -> Result<(), StoreError> {
            let mut keys = HashSet::new();
            for mask in masks {
                if mask.key.is_empty() || !keys.insert(mask.key.as_str()) {
                    return Err(corrupt(format!("mask key {:?}", mask.key)));
                }
                check_array(&mask.array)?;
            }
            Ok(())
        };

        check_masks(&self.masks)?;
        if let Some(counts) = &self.counts {
            check_blob(counts)?;
        }

        let mut coords = HashSet::with_capacity(self.tiles.len());
        for tile in &self.tiles {
            if tile.coord.ndim() != self.slide.ndim() || !coords.insert(&tile.coord) {
                return Err(corrupt(format!("tile coordinate {}", tile.coord)));
            }
            check_array(&tile.pixels)?;
            check_masks(&tile.masks)?;
            tile.labels
                .validate()
                .map_err(|e| corrupt(format!("labels of tile {}: {}", tile.coord, e)))?;
        }
        Ok(())
    }
}
