//! Dense n-dimensional arrays.
//!
//! [`NdArray`] is the payload type for tile pixels, masks and array labels:
//! a dtype, a shape and the raw little-endian, row-major element bytes. Arrays
//! are cheap to clone (the bytes are reference counted) and are persisted
//! byte-for-byte, which is what makes container round-trips exact.
//!
//! Grid-aligned operations (cropping, padding, stitching) treat the leading
//! `k` axes as spatial and everything after them as an opaque per-pixel
//! payload, so an RGB tile `[h, w, 3]` and a label map `[h, w]` share the
//! same code paths.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// =============================================================================
// DType
// =============================================================================

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Whether this is an integer type (masks must be).
    pub const fn is_integer(&self) -> bool {
        !matches!(self, DType::F32 | DType::F64)
    }

    /// Lowercase name, as written in the container manifest.
    pub const fn name(&self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Element
// =============================================================================

/// Rust scalar types that can be stored in an [`NdArray`].
pub trait Element: Copy + Send + Sync + 'static {
    /// The dtype tag for this element type.
    const DTYPE: DType;

    /// Append the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element from exactly `DTYPE.size()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                #[inline]
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_element!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

// =============================================================================
// NdArray
// =============================================================================

/// A dense, row-major, little-endian n-dimensional array.
///
/// Equality is byte equality of the payload together with dtype and shape,
/// so float arrays compare bit-exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ArrayRepr", try_from = "ArrayRepr")]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Wrap raw little-endian bytes.
    ///
    /// Fails with `ShapeMismatch` if the byte length does not match
    /// `product(shape) * dtype.size()`.
    pub fn new(
        dtype: DType,
        shape: impl Into<Vec<usize>>,
        data: impl Into<Bytes>,
    ) -> Result<Self, StoreError> {
        let shape = shape.into();
        let data = data.into();
        let expected = element_count(&shape) * dtype.size();
        if data.len() != expected {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{} bytes for {} {:?}", expected, dtype, shape),
                actual: format!("{} bytes", data.len()),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build an array from typed values.
    pub fn from_vec<T: Element>(
        shape: impl Into<Vec<usize>>,
        values: Vec<T>,
    ) -> Result<Self, StoreError> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size());
        for v in values {
            v.write_le(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    /// A zero-filled array.
    pub fn zeros(dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = element_count(&shape) * dtype.size();
        Self {
            dtype,
            shape,
            data: Bytes::from(vec![0u8; len]),
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Decode the payload into typed values.
    ///
    /// Fails with `TypeMismatch` if `T` does not match the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, StoreError> {
        if T::DTYPE != self.dtype {
            return Err(StoreError::TypeMismatch {
                expected: self.dtype.to_string(),
                actual: T::DTYPE.to_string(),
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size())
            .map(T::read_le)
            .collect())
    }

    /// Apply `f` to every element, keeping shape and dtype.
    pub fn map<T: Element>(&self, f: impl Fn(T) -> T) -> Result<Self, StoreError> {
        let values = self.to_vec::<T>()?.into_iter().map(f).collect();
        Self::from_vec(self.shape.clone(), values)
    }

    /// Bytes per position along the leading `spatial_ndim` axes.
    fn inner_bytes(&self, spatial_ndim: usize) -> usize {
        element_count(&self.shape[spatial_ndim..]) * self.dtype.size()
    }

    fn check_spatial(&self, spatial_ndim: usize) -> Result<(), StoreError> {
        if spatial_ndim == 0 || spatial_ndim > self.shape.len() {
            return Err(StoreError::ShapeMismatch {
                expected: format!("at least {} axes", spatial_ndim.max(1)),
                actual: format!("{:?}", self.shape),
            });
        }
        Ok(())
    }

    /// Extract the block `[origin, origin + size)` over the leading axes.
    pub fn crop(&self, origin: &[usize], size: &[usize]) -> Result<Self, StoreError> {
        let k = origin.len();
        self.check_spatial(k)?;
        let in_bounds = size.len() == k
            && (0..k).all(|a| origin[a] + size[a] <= self.shape[a]);
        if !in_bounds {
            return Err(StoreError::ShapeMismatch {
                expected: format!("block within {:?}", &self.shape[..k]),
                actual: format!("origin {:?} size {:?}", origin, size),
            });
        }

        let mut shape = size.to_vec();
        shape.extend_from_slice(&self.shape[k..]);
        let mut out = vec![0u8; element_count(&shape) * self.dtype.size()];
        copy_block(
            &self.data,
            &self.shape[..k],
            origin,
            &mut out,
            size,
            &vec![0; k],
            size,
            self.inner_bytes(k),
        );
        Self::new(self.dtype, shape, out)
    }

    /// Zero-pad the trailing edges of the leading axes up to `target`.
    ///
    /// Returns the array unchanged when it already has the target extent.
    pub fn pad_to(&self, target: &[usize]) -> Result<Self, StoreError> {
        let k = target.len();
        self.check_spatial(k)?;
        if self.shape[..k] == *target {
            return Ok(self.clone());
        }
        if (0..k).any(|a| self.shape[a] > target[a]) {
            return Err(StoreError::ShapeMismatch {
                expected: format!("extent at most {:?}", target),
                actual: format!("{:?}", &self.shape[..k]),
            });
        }

        let mut shape = target.to_vec();
        shape.extend_from_slice(&self.shape[k..]);
        let mut out = vec![0u8; element_count(&shape) * self.dtype.size()];
        copy_block(
            &self.data,
            &self.shape[..k],
            &vec![0; k],
            &mut out,
            target,
            &vec![0; k],
            &self.shape[..k],
            self.inner_bytes(k),
        );
        Self::new(self.dtype, shape, out)
    }
}

/// Product of a shape's extents (1 for a scalar shape).
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Byte strides of the leading axes of a row-major array.
fn strides(shape: &[usize], inner_bytes: usize) -> Vec<usize> {
    let mut out = vec![0; shape.len()];
    let mut acc = inner_bytes;
    for axis in (0..shape.len()).rev() {
        out[axis] = acc;
        acc *= shape[axis];
    }
    out
}

/// Copy an axis-aligned block between two row-major buffers.
///
/// `src_shape`/`dst_shape`, origins and `extent` cover the leading axes only;
/// `inner_bytes` is the size of everything below them. Callers guarantee the
/// block lies within both buffers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_block(
    src: &[u8],
    src_shape: &[usize],
    src_origin: &[usize],
    dst: &mut [u8],
    dst_shape: &[usize],
    dst_origin: &[usize],
    extent: &[usize],
    inner_bytes: usize,
) {
    let k = extent.len();
    if k == 0 || extent.iter().any(|&e| e == 0) {
        return;
    }

    let src_strides = strides(src_shape, inner_bytes);
    let dst_strides = strides(dst_shape, inner_bytes);
    let run = extent[k - 1] * inner_bytes;
    let mut index = vec![0usize; k - 1];

    loop {
        let mut s = src_origin[k - 1] * src_strides[k - 1];
        let mut d = dst_origin[k - 1] * dst_strides[k - 1];
        for axis in 0..k - 1 {
            s += (src_origin[axis] + index[axis]) * src_strides[axis];
            d += (dst_origin[axis] + index[axis]) * dst_strides[axis];
        }
        dst[d..d + run].copy_from_slice(&src[s..s + run]);

        // Odometer over all axes but the last
        let mut axis = k - 1;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < extent[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

// =============================================================================
// Serialization
// =============================================================================

/// Inline manifest representation (used for array-valued labels).
#[derive(Serialize, Deserialize)]
struct ArrayRepr {
    dtype: DType,
    shape: Vec<usize>,
    data: String,
}

impl From<NdArray> for ArrayRepr {
    fn from(array: NdArray) -> Self {
        Self {
            dtype: array.dtype,
            shape: array.shape,
            data: hex::encode(&array.data),
        }
    }
}

impl TryFrom<ArrayRepr> for NdArray {
    type Error = StoreError;

    fn try_from(repr: ArrayRepr) -> Result<Self, Self::Error> {
        let data = hex::decode(&repr.data)
            .map_err(|e| StoreError::CorruptContainer(format!("array payload: {}", e)))?;
        NdArray::new(repr.dtype, repr.shape, data)
    }
}
