//! Decoder interface and the in-memory decoder.

use async_trait::async_trait;

use crate::array::{DType, NdArray};
use crate::error::DecodeError;
use crate::tile::Region;

/// Reads pixel regions from a slide source.
///
/// This is the seam to image-format decoding: vendor formats plug in by
/// implementing it. The engine calls [`read_region`](Self::read_region) once
/// per tile with the tile's clipped read region.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Spatial shape of level 0, one extent per grid axis.
    fn shape(&self) -> &[usize];

    /// Per-pixel payload shape (e.g. `[3]` for RGB, `[]` for grayscale).
    fn trailing_dims(&self) -> &[usize];

    /// Element type of decoded pixels.
    fn dtype(&self) -> DType;

    /// Number of pyramid levels.
    fn level_count(&self) -> usize {
        1
    }

    /// Spatial shape of a pyramid level.
    fn level_shape(&self, level: usize) -> Option<Vec<usize>> {
        (level == 0).then(|| self.shape().to_vec())
    }

    /// Read `region` (in the level's coordinates) as an array of shape
    /// `region.size ++ trailing_dims`.
    async fn read_region(&self, region: &Region, level: usize) -> Result<NdArray, DecodeError>;
}

// =============================================================================
// ArrayDecoder
// =============================================================================

/// A decoder over arrays already in memory.
///
/// The leading `spatial_ndim` axes of each level are the slide axes; the rest
/// are the per-pixel payload.
#[derive(Debug, Clone)]
pub struct ArrayDecoder {
    levels: Vec<NdArray>,
    spatial_ndim: usize,
}

impl ArrayDecoder {
    /// Wrap a level-0 array.
    pub fn new(array: NdArray, spatial_ndim: usize) -> Result<Self, DecodeError> {
        if spatial_ndim == 0 || spatial_ndim > array.ndim() {
            return Err(DecodeError::InvalidArray(format!(
                "cannot use {} spatial axes of a {}-d array",
                spatial_ndim,
                array.ndim()
            )));
        }
        Ok(Self {
            levels: vec![array],
            spatial_ndim,
        })
    }

    /// Add a lower-resolution level. It must share dtype and trailing dims.
    pub fn with_level(mut self, array: NdArray) -> Result<Self, DecodeError> {
        let base = &self.levels[0];
        let compatible = array.dtype() == base.dtype()
            && array.ndim() == base.ndim()
            && array.shape()[self.spatial_ndim..] == base.shape()[self.spatial_ndim..];
        if !compatible {
            return Err(DecodeError::InvalidArray(format!(
                "level {} {:?} does not match base {} {:?}",
                array.dtype(),
                array.shape(),
                base.dtype(),
                base.shape()
            )));
        }
        self.levels.push(array);
        Ok(self)
    }

    fn level(&self, level: usize) -> Result<&NdArray, DecodeError> {
        self.levels.get(level).ok_or(DecodeError::InvalidLevel {
            level,
            count: self.levels.len(),
        })
    }
}

#[async_trait]
impl Decoder for ArrayDecoder {
    fn shape(&self) -> &[usize] {
        &self.levels[0].shape()[..self.spatial_ndim]
    }

    fn trailing_dims(&self) -> &[usize] {
        &self.levels[0].shape()[self.spatial_ndim..]
    }

    fn dtype(&self) -> DType {
        self.levels[0].dtype()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_shape(&self, level: usize) -> Option<Vec<usize>> {
        self.levels
            .get(level)
            .map(|a| a.shape()[..self.spatial_ndim].to_vec())
    }

    async fn read_region(&self, region: &Region, level: usize) -> Result<NdArray, DecodeError> {
        let array = self.level(level)?;
        let shape = &array.shape()[..self.spatial_ndim];
        if !region.fits_within(shape) {
            return Err(DecodeError::RegionOutOfBounds {
                region: region.to_string(),
                shape: shape.to_vec(),
            });
        }
        array
            .crop(&region.origin, &region.size)
            .map_err(|e| DecodeError::InvalidArray(e.to_string()))
    }
}
