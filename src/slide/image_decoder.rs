//! Raster image decoding and encoding.
//!
//! [`ImageDecoder`] turns an ordinary image file (PNG, JPEG, TIFF) into a
//! single-level slide of RGB pixels. It is the reference [`Decoder`] for
//! inputs that fit in memory; vendor formats implement the trait directly.
//!
//! The encode helpers go the other way and are used to export stitched
//! windows and masks.

use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{
    DynamicImage, GrayImage, ImageBuffer, ImageFormat, ImageReader, Luma, RgbImage, RgbaImage,
};
use tracing::debug;

use crate::array::{DType, NdArray};
use crate::error::{DecodeError, IoError};
use crate::tile::Region;

use super::decoder::{ArrayDecoder, Decoder};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// ImageDecoder
// =============================================================================

/// A slide decoded from a raster image into `[height, width, 3]` u8 pixels.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    inner: ArrayDecoder,
}

impl ImageDecoder {
    /// Decode the image at `path`. The format is guessed from the content.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        let image = tokio::task::spawn_blocking(move || {
            let reader = ImageReader::open(&path)
                .map_err(|e| DecodeError::Io(IoError::file(&path, e)))?
                .with_guessed_format()
                .map_err(|e| DecodeError::Io(IoError::file(&path, e)))?;
            reader
                .decode()
                .map_err(|e| DecodeError::Image(e.to_string()))
        })
        .await
        .map_err(|e| DecodeError::Image(format!("decode task failed: {}", e)))??;

        debug!(path = %shown, width = image.width(), height = image.height(), "Decoded image");
        Self::from_image(image)
    }

    /// Decode an in-memory encoded image.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let image = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.to_string()))?
            .decode()
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        Self::from_image(image)
    }

    fn from_image(image: DynamicImage) -> Result<Self, DecodeError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let shape = vec![height as usize, width as usize, 3];
        let array = NdArray::new(DType::U8, shape, rgb.into_raw())
            .map_err(|e| DecodeError::InvalidArray(e.to_string()))?;
        Ok(Self {
            inner: ArrayDecoder::new(array, 2)?,
        })
    }
}

#[async_trait]
impl Decoder for ImageDecoder {
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
        self.inner.read_region(region, level).await
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a 2-D array as PNG.
///
/// Accepts u8 arrays of shape `[h, w]`, `[h, w, 1]`, `[h, w, 3]` or
/// `[h, w, 4]`, and u16 arrays of shape `[h, w]` (e.g. label masks).
pub fn encode_png(array: &NdArray) -> Result<Bytes, DecodeError> {
    let image = to_dynamic(array)?;
    let mut output = Cursor::new(Vec::new());
    image
        .write_to(&mut output, ImageFormat::Png)
        .map_err(|e| DecodeError::Encode(e.to_string()))?;
    Ok(Bytes::from(output.into_inner()))
}

/// Encode a 2-D u8 array as JPEG at `quality` (clamped to 1-100).
///
/// An alpha channel is dropped.
pub fn encode_jpeg(array: &NdArray, quality: u8) -> Result<Bytes, DecodeError> {
    let image = match to_dynamic(array)? {
        DynamicImage::ImageLuma16(_) => {
            return Err(DecodeError::Encode("JPEG requires u8 pixels".to_string()));
        }
        rgba @ DynamicImage::ImageRgba8(_) => DynamicImage::ImageRgb8(rgba.to_rgb8()),
        other => other,
    };

    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
    encoder
        .encode_image(&image)
        .map_err(|e| DecodeError::Encode(e.to_string()))?;
    Ok(Bytes::from(output))
}

fn to_dynamic(array: &NdArray) -> Result<DynamicImage, DecodeError> {
    let shape = array.shape();
    let unsupported = || {
        DecodeError::Encode(format!(
            "cannot encode {} array of shape {:?} as an image",
            array.dtype(),
            shape
        ))
    };
    if shape.len() < 2 || shape.len() > 3 {
        return Err(unsupported());
    }
    let height = u32::try_from(shape[0]).map_err(|_| unsupported())?;
    let width = u32::try_from(shape[1]).map_err(|_| unsupported())?;
    let channels = shape.get(2).copied().unwrap_or(1);

    match (array.dtype(), channels) {
        (DType::U8, 1) => GrayImage::from_raw(width, height, array.data().to_vec())
            .map(DynamicImage::ImageLuma8),
        (DType::U8, 3) => RgbImage::from_raw(width, height, array.data().to_vec())
            .map(DynamicImage::ImageRgb8),
        (DType::U8, 4) => RgbaImage::from_raw(width, height, array.data().to_vec())
            .map(DynamicImage::ImageRgba8),
        (DType::U16, 1) => {
            let values = array
                .to_vec::<u16>()
                .map_err(|e| DecodeError::Encode(e.to_string()))?;
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, values)
                .map(DynamicImage::ImageLuma16)
        }
        _ => None,
    }
    .ok_or_else(unsupported)
}
