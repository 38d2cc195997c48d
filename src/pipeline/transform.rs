use std::fmt;
use std::sync::Arc;

use crate::error::TransformError;
use crate::tile::Tile;

/// A per-tile operation.
///
/// Transforms receive the tile by mutable reference and may replace its
/// pixels, masks, labels and counts. They must not depend on other tiles:
/// the engine may run them on any worker, in any order.
pub trait Transform: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Apply the transform to one tile.
    fn apply(&self, tile: &mut Tile) -> Result<(), TransformError>;
}

impl<T: Transform + ?Sized> Transform for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn apply(&self, tile: &mut Tile) -> Result<(), TransformError> {
        (**self).apply(tile)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// An ordered list of transforms, itself a [`Transform`].
///
/// Transforms run in insertion order and the first error stops the tile.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    transforms: Vec<Arc<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::named("pipeline")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transforms: Vec::new(),
        }
    }

    /// Append a transform (builder form).
    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.push(transform);
        self
    }

    pub fn push(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(Arc::new(transform));
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Names of the transforms in order.
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("transforms", &self.names())
            .finish()
    }
}

impl Transform for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, tile: &mut Tile) -> Result<(), TransformError> {
        for transform in &self.transforms {
            transform.apply(tile)?;
        }
        Ok(())
    }
}

// =============================================================================
// Closures
// =============================================================================

/// A transform backed by a closure. See [`from_fn`].
pub struct FnTransform<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named transform.
///
/// The closure reports failures as a message; it is wrapped into a
/// [`TransformError`] carrying the transform's name.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnTransform<F>
where
    F: Fn(&mut Tile) -> Result<(), String> + Send + Sync,
{
    FnTransform {
        name: name.into(),
        f,
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&mut Tile) -> Result<(), String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, tile: &mut Tile) -> Result<(), TransformError> {
        (self.f)(tile).map_err(|message| TransformError::new(&self.name, message))
    }
}
