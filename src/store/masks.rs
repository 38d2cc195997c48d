//! Mask scopes and the per-scope mask view.

use std::fmt;

use crate::array::NdArray;
use crate::error::StoreError;
use crate::tile::TileCoord;

use super::Store;

/// Where a mask or label lives: on the whole slide or on one tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Slide,
    Tile(TileCoord),
}

impl From<TileCoord> for Scope {
    fn from(coord: TileCoord) -> Self {
        Scope::Tile(coord)
    }
}

impl From<&TileCoord> for Scope {
    fn from(coord: &TileCoord) -> Self {
        Scope::Tile(coord.clone())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Slide => f.write_str("slide"),
            Scope::Tile(coord) => write!(f, "tile {}", coord),
        }
    }
}

/// Check a mask's key and dtype.
///
/// Keys must be non-empty (`InvalidKey`); masks must be integer-typed
/// (`TypeMismatch`). Shape is checked against the scope by the caller.
pub fn check_mask(key: &str, mask: &NdArray) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if !mask.dtype().is_integer() {
        return Err(StoreError::TypeMismatch {
            expected: "integer mask".to_string(),
            actual: mask.dtype().to_string(),
        });
    }
    Ok(())
}

/// Mask namespace of one scope of a [`Store`].
///
/// A thin view: it holds only the store reference and the scope, and every
/// call goes straight through to the store.
#[derive(Clone)]
pub struct MaskCollection<'a> {
    store: &'a Store,
    scope: Scope,
}

impl<'a> MaskCollection<'a> {
    pub(crate) fn new(store: &'a Store, scope: Scope) -> Self {
        Self { store, scope }
    }

    /// The scope this view covers.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Insert a new mask; `DuplicateKey` if the key exists.
    pub async fn add(&self, key: &str, mask: NdArray) -> Result<(), StoreError> {
        self.store.add_mask(&self.scope, key, mask).await
    }

    /// Overwrite a mask, or insert it if absent.
    pub async fn update(&self, key: &str, mask: NdArray) -> Result<(), StoreError> {
        self.store.put_mask(&self.scope, key, mask).await
    }

    pub async fn get(&self, key: &str) -> Result<NdArray, StoreError> {
        self.store.get_mask(&self.scope, key).await
    }

    /// Remove a mask; `NotFound` if absent.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove_mask(&self.scope, key).await
    }

    /// Keys in insertion order.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.store.mask_keys(&self.scope).await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    pub async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keys().await?.iter().any(|k| k == key))
    }
}
