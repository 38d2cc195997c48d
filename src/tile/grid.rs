//! Tile grid addressing.
//!
//! A [`TileGrid`] is a pure function of the slide shape, tile size, stride and
//! padding policy. It produces the ordered set of tile origins and, for each,
//! the region to read from the source and the region it covers on the slide
//! canvas. Nothing here is stored or does I/O.
//!
//! # Counting
//!
//! Per axis, with slide extent `S`, tile extent `T` and stride `K`:
//!
//! - padded: `ceil((S - T) / K) + 1` origins (one origin when `S < T`); edge
//!   tiles extend past the slide and are zero-filled on read
//! - unpadded: `floor((S - T) / K) + 1` origins (none when `S < T`); only
//!   tiles fully inside the slide are emitted
//!
//! The grid is the Cartesian product of the per-axis origins, enumerated
//! row-major (last axis fastest). That enumeration order is also the overlap
//! order: where tiles overlap (`K < T`), later tiles win.

use std::fmt;

use crate::error::GridError;

use super::TileCoord;

// =============================================================================
// Extent
// =============================================================================

/// Tile size or stride: one value for every axis, or one value per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extent {
    /// Same extent along every axis
    Uniform(usize),
    /// Explicit extent per axis
    PerAxis(Vec<usize>),
}

impl Extent {
    fn resolve(&self, ndim: usize, what: &'static str) -> Result<Vec<usize>, GridError> {
        let values = match self {
            Extent::Uniform(v) => vec![*v; ndim],
            Extent::PerAxis(v) => {
                if v.len() != ndim {
                    return Err(GridError::AxisMismatch {
                        what,
                        expected: ndim,
                        actual: v.len(),
                    });
                }
                v.clone()
            }
        };
        if values.iter().any(|&v| v == 0) {
            return Err(GridError::ZeroExtent { what, values });
        }
        Ok(values)
    }
}

impl From<usize> for Extent {
    fn from(v: usize) -> Self {
        Extent::Uniform(v)
    }
}

impl From<Vec<usize>> for Extent {
    fn from(v: Vec<usize>) -> Self {
        Extent::PerAxis(v)
    }
}

impl From<&[usize]> for Extent {
    fn from(v: &[usize]) -> Self {
        Extent::PerAxis(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Extent {
    fn from(v: [usize; N]) -> Self {
        Extent::PerAxis(v.to_vec())
    }
}

impl From<(usize, usize)> for Extent {
    fn from((a, b): (usize, usize)) -> Self {
        Extent::PerAxis(vec![a, b])
    }
}

// =============================================================================
// Region
// =============================================================================

/// An axis-aligned box `[origin, origin + size)` over the grid axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub origin: Vec<usize>,
    pub size: Vec<usize>,
}

impl Region {
    /// Create a region.
    pub fn new(origin: impl Into<Vec<usize>>, size: impl Into<Vec<usize>>) -> Self {
        Self {
            origin: origin.into(),
            size: size.into(),
        }
    }

    /// The region `[0, shape)`.
    pub fn full(shape: &[usize]) -> Self {
        Self::new(vec![0; shape.len()], shape.to_vec())
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.origin.len()
    }

    /// Exclusive end along `axis`.
    pub fn end(&self, axis: usize) -> usize {
        self.origin[axis] + self.size[axis]
    }

    /// Whether the region covers no positions.
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|&s| s == 0)
    }

    /// Whether the region lies within `[0, shape)`.
    pub fn fits_within(&self, shape: &[usize]) -> bool {
        self.ndim() == shape.len() && (0..self.ndim()).all(|a| self.end(a) <= shape[a])
    }

    /// Intersection with another region, or `None` if they do not overlap.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        if self.ndim() != other.ndim() {
            return None;
        }
        let mut origin = Vec::with_capacity(self.ndim());
        let mut size = Vec::with_capacity(self.ndim());
        for axis in 0..self.ndim() {
            let start = self.origin[axis].max(other.origin[axis]);
            let end = self.end(axis).min(other.end(axis));
            if end <= start {
                return None;
            }
            origin.push(start);
            size.push(end - start);
        }
        Some(Region { origin, size })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in 0..self.ndim() {
            if axis > 0 {
                f.write_str(" x ")?;
            }
            write!(f, "[{}, {})", self.origin[axis], self.end(axis))?;
        }
        Ok(())
    }
}

// =============================================================================
// Grid
// =============================================================================

/// One tile of a grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridEntry {
    /// Position in enumeration order
    pub index: usize,

    /// Tile origin
    pub coord: TileCoord,

    /// Source region to read: `[origin, origin + T)` clipped to the slide
    pub read: Region,

    /// Canvas region the tile projects onto: `[origin, origin + T)`, not
    /// clipped (padded content is discarded when the canvas is rebuilt)
    pub canvas: Region,
}

/// Tile grid over a slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    shape: Vec<usize>,
    tile_size: Vec<usize>,
    stride: Vec<usize>,
    pad: bool,
}

impl TileGrid {
    /// Create an unpadded, non-overlapping grid (stride = tile size).
    pub fn new(shape: impl Into<Vec<usize>>, tile_size: impl Into<Extent>) -> Result<Self, GridError> {
        let shape = shape.into();
        if shape.is_empty() {
            return Err(GridError::EmptyShape);
        }
        let tile_size = tile_size.into().resolve(shape.len(), "tile size")?;
        Ok(Self {
            stride: tile_size.clone(),
            shape,
            tile_size,
            pad: false,
        })
    }

    /// Set the stride between tile origins.
    pub fn with_stride(mut self, stride: impl Into<Extent>) -> Result<Self, GridError> {
        self.stride = stride.into().resolve(self.shape.len(), "stride")?;
        Ok(self)
    }

    /// Set the padding policy.
    pub fn with_padding(mut self, pad: bool) -> Self {
        self.pad = pad;
        self
    }

    /// Slide extent per axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Tile extent per axis.
    pub fn tile_size(&self) -> &[usize] {
        &self.tile_size
    }

    /// Stride per axis.
    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    /// Whether edge tiles are padded.
    pub fn is_padded(&self) -> bool {
        self.pad
    }

    /// Whether neighbouring tiles overlap along some axis.
    pub fn is_overlapping(&self) -> bool {
        self.stride
            .iter()
            .zip(&self.tile_size)
            .any(|(k, t)| k < t)
    }

    /// Number of tile origins along each axis.
    pub fn axis_counts(&self) -> Vec<usize> {
        (0..self.shape.len())
            .map(|axis| {
                axis_count(
                    self.shape[axis],
                    self.tile_size[axis],
                    self.stride[axis],
                    self.pad,
                )
            })
            .collect()
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.axis_counts().iter().product()
    }

    /// Whether the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tile at position `index` in enumeration order.
    pub fn entry(&self, index: usize) -> Option<GridEntry> {
        let counts = self.axis_counts();
        if index >= counts.iter().product::<usize>() {
            return None;
        }

        let mut origin = vec![0; counts.len()];
        let mut rem = index;
        for axis in (0..counts.len()).rev() {
            origin[axis] = (rem % counts[axis]) * self.stride[axis];
            rem /= counts[axis];
        }

        Some(self.entry_at(index, origin))
    }

    fn entry_at(&self, index: usize, origin: Vec<usize>) -> GridEntry {
        let read_size = (0..origin.len())
            .map(|axis| {
                self.tile_size[axis].min(self.shape[axis].saturating_sub(origin[axis]))
            })
            .collect::<Vec<_>>();

        GridEntry {
            index,
            read: Region::new(origin.clone(), read_size),
            canvas: Region::new(origin.clone(), self.tile_size.clone()),
            coord: TileCoord::new(origin),
        }
    }

    /// All tiles in enumeration order (row-major, last axis fastest).
    pub fn entries(&self) -> impl Iterator<Item = GridEntry> + '_ {
        (0..self.len()).filter_map(move |index| self.entry(index))
    }

    /// All tile origins in enumeration order.
    pub fn coords(&self) -> Vec<TileCoord> {
        self.entries().map(|e| e.coord).collect()
    }

    /// Look up the grid entry for a tile origin.
    pub fn entry_for(&self, coord: &TileCoord) -> Option<GridEntry> {
        let counts = self.axis_counts();
        if coord.ndim() != counts.len() {
            return None;
        }

        let mut index = 0;
        for (axis, &c) in coord.as_slice().iter().enumerate() {
            if c % self.stride[axis] != 0 || c / self.stride[axis] >= counts[axis] {
                return None;
            }
            index = index * counts[axis] + c / self.stride[axis];
        }

        Some(self.entry_at(index, coord.as_slice().to_vec()))
    }
}

/// Number of origins along one axis.
fn axis_count(extent: usize, tile: usize, stride: usize, pad: bool) -> usize {
    if extent >= tile {
        let span = extent - tile;
        if pad {
            span.div_ceil(stride) + 1
        } else {
            span / stride + 1
        }
    } else if pad && extent > 0 {
        1
    } else {
        0
    }
}
