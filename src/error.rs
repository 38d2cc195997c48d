use thiserror::Error;

use crate::tile::TileCoord;

/// I/O errors raised while reading or writing the backing container file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the local filesystem
    #[error("File error on {path}: {message}")]
    File { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl IoError {
    /// Wrap a `std::io::Error` raised for `path`.
    pub fn file(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::File {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors raised by the persistent store.
///
/// Every store operation surfaces these unmodified; none of them is retried.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Missing container, tile coordinate, mask or label
    #[error("Not found: {0}")]
    NotFound(String),

    /// `create` over an existing container without overwrite
    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    /// Value violates the slide's tile schema or a scope's shape
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Value violates a namespace's type constraint
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Insert-only write on an existing key
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Empty or malformed key
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// Label value outside the supported kinds
    #[error("Unsupported label type: {0}")]
    UnsupportedType(String),

    /// Container layout or schema version does not match
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    /// I/O error on the backing file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors raised by a decoder while reading a slide region
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Region falls outside the slide
    #[error("Region out of bounds: {region} on slide of shape {shape:?}")]
    RegionOutOfBounds { region: String, shape: Vec<usize> },

    /// Pyramid level does not exist
    #[error("Invalid level {level}: slide has {count} level(s)")]
    InvalidLevel { level: usize, count: usize },

    /// Source image could not be decoded
    #[error("Image decode failed: {0}")]
    Image(String),

    /// Decoded data does not have the expected layout
    #[error("Invalid array: {0}")]
    InvalidArray(String),

    /// Array could not be encoded as an image
    #[error("Image encode failed: {0}")]
    Encode(String),

    /// I/O error while reading the source
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Error returned by a single transform
#[derive(Debug, Clone, Error)]
#[error("transform '{transform}' failed: {message}")]
pub struct TransformError {
    /// Name of the failing transform
    pub transform: String,
    /// Failure description
    pub message: String,
}

impl TransformError {
    /// Create a new transform error.
    pub fn new(transform: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transform: transform.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while building a tile grid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Slide shape has no axes
    #[error("Slide shape must have at least one axis")]
    EmptyShape,

    /// Tile size or stride has a different number of axes than the shape
    #[error("{what} has {actual} axes, slide shape has {expected}")]
    AxisMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Tile size or stride is zero along some axis
    #[error("{what} must be positive along every axis, got {values:?}")]
    ZeroExtent {
        what: &'static str,
        values: Vec<usize>,
    },
}

/// Errors raised by the pipeline engine.
///
/// The engine is fail-fast: the first of these aborts the whole run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Reading a tile from its source failed
    #[error("Decoding tile {coord} failed: {source}")]
    Decode {
        coord: TileCoord,
        #[source]
        source: DecodeError,
    },

    /// A transform failed on a tile
    #[error("Tile {coord}: {source}")]
    Transform {
        coord: TileCoord,
        #[source]
        source: TransformError,
    },

    /// Committing results (or loading a stored tile) failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The worker pool refused a unit of work
    #[error("Worker pool submission failed: {0}")]
    PoolSubmission(String),

    /// A submitted task was dropped before reporting a result
    #[error("Task for tile {coord} was lost by the worker pool")]
    TaskLost { coord: TileCoord },

    /// The caller cancelled the run
    #[error("Pipeline run cancelled")]
    Cancelled,
}

/// Errors raised by slide lifecycle operations
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Decoder error
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid grid parameters
    #[error(transparent)]
    Grid(#[from] GridError),
}
