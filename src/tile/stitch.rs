//! Reconstruction of slide windows from tiles.

use crate::array::{copy_block, element_count, DType, NdArray};
use crate::error::StoreError;

use super::Region;

/// A window of the slide canvas being rebuilt from tiles.
///
/// Tiles are painted in the order given, each one overwriting whatever an
/// earlier tile put in the same positions. Only the part of a tile that lies
/// inside both the window and the slide bounds is copied, so zero padding on
/// edge tiles never reaches the canvas. Positions no tile covers stay zero.
#[derive(Debug, Clone)]
pub struct Canvas {
    window: Region,
    bounds: Option<Region>,
    trailing: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl Canvas {
    /// Create a zeroed canvas for `window` over a slide of `slide_shape`.
    ///
    /// `trailing` is the per-pixel payload shape (e.g. `[3]` for RGB).
    pub fn new(window: Region, slide_shape: &[usize], trailing: &[usize], dtype: DType) -> Self {
        let bounds = window.intersect(&Region::full(slide_shape));
        let len = element_count(&window.size) * element_count(trailing) * dtype.size();
        Self {
            window,
            bounds,
            trailing: trailing.to_vec(),
            dtype,
            data: vec![0u8; len],
        }
    }

    /// The window being rebuilt.
    pub fn window(&self) -> &Region {
        &self.window
    }

    /// Paint a tile whose unclipped canvas region is `canvas`.
    pub fn paint(&mut self, canvas: &Region, image: &NdArray) -> Result<(), StoreError> {
        if image.dtype() != self.dtype {
            return Err(StoreError::TypeMismatch {
                expected: self.dtype.to_string(),
                actual: image.dtype().to_string(),
            });
        }
        let mut expected = canvas.size.clone();
        expected.extend_from_slice(&self.trailing);
        if image.shape() != expected.as_slice() {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", image.shape()),
            });
        }

        let Some(visible) = self
            .bounds
            .as_ref()
            .and_then(|bounds| canvas.intersect(bounds))
        else {
            return Ok(());
        };

        let src_origin: Vec<usize> = (0..visible.ndim())
            .map(|a| visible.origin[a] - canvas.origin[a])
            .collect();
        let dst_origin: Vec<usize> = (0..visible.ndim())
            .map(|a| visible.origin[a] - self.window.origin[a])
            .collect();
        let inner_bytes = element_count(&self.trailing) * self.dtype.size();

        copy_block(
            image.data(),
            &canvas.size,
            &src_origin,
            &mut self.data,
            &self.window.size,
            &dst_origin,
            &visible.size,
            inner_bytes,
        );
        Ok(())
    }

    /// Finish and return the window as an array of shape `window ++ trailing`.
    pub fn into_array(self) -> Result<NdArray, StoreError> {
        let mut shape = self.window.size;
        shape.extend_from_slice(&self.trailing);
        NdArray::new(self.dtype, shape, self.data)
    }
}
