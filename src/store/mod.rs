//! Persistent slide store.
//!
//! A [`Store`] owns one container file (see [`crate::format`]) and exposes
//! typed namespaces over it:
//!
//! - **tiles**: pixel arrays keyed by [`TileCoord`], in insertion order
//! - **masks**: named integer arrays per [`Scope`] (slide or tile)
//! - **labels**: ordered key/value pairs per scope
//! - **counts**: the slide's obs/var tables
//!
//! # Concurrency
//!
//! All state sits behind one `RwLock`. Writes (including blob appends) take
//! the write lock and are therefore serialized; reads share the read lock.
//! Blobs are read through a [`BlockCache`] whose length is published only
//! after an append has been flushed to the file.
//!
//! # Durability
//!
//! Blob bytes are appended immediately; the manifest describing them is
//! written by [`Store::flush`] and [`Store::close`]. Dropping a store with
//! unflushed changes writes the manifest synchronously, so the container on
//! disk is valid however the owner exits.

mod bits;
mod counts;
mod label;
mod masks;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::array::NdArray;
use crate::error::{IoError, StoreError};
use crate::format::{
    encode_header, encode_tail, read_manifest, ArrayRecord, BlobRef, Manifest, MaskRecord,
    TileRecord, TileSchema,
};
use crate::io::{BlockCache, FileRangeReader, RangeReader};
use crate::tile::{Tile, TileCoord};

pub use crate::format::SlideMetadata;
pub use counts::{Column, Counts, Table};
pub use label::{LabelValue, Labels};
pub use masks::{check_mask, MaskCollection, Scope};

// =============================================================================
// Writer
// =============================================================================

/// Append-only writer over the container file.
struct Writer {
    file: File,
    path: PathBuf,
    /// Published file length, shared with the reader
    len: Arc<AtomicU64>,
}

impl Writer {
    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Append `bytes` and return the offset they were written at.
    async fn append(&mut self, bytes: &[u8]) -> Result<u64, StoreError> {
        let offset = self.len();
        let result = async {
            self.file.write_all(bytes).await?;
            self.file.flush().await
        }
        .await;

        if let Err(e) = result {
            // A partial write leaves dead bytes; resync so later offsets stay right.
            if let Ok(meta) = self.file.metadata().await {
                self.len.store(meta.len(), Ordering::Release);
            }
            return Err(IoError::file(&self.path, e).into());
        }

        self.len.store(offset + bytes.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Blocking append, for use from `Drop`.
    fn append_blocking(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| IoError::file(&self.path, e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| IoError::file(&self.path, e))?;
        self.len.fetch_add(bytes.len() as u64, Ordering::AcqRel);
        Ok(())
    }
}

// =============================================================================
// State
// =============================================================================

struct State {
    manifest: Manifest,
    /// Position of each tile in `manifest.tiles`
    tile_index: HashMap<TileCoord, usize>,
    /// Decoded counts; the blob is written on flush
    counts: Option<Counts>,
    counts_dirty: bool,
    /// Manifest differs from the last one written
    dirty: bool,
    writer: Writer,
}

impl State {
    fn new(manifest: Manifest, counts: Option<Counts>, writer: Writer) -> Self {
        let tile_index = index_tiles(&manifest.tiles);
        Self {
            manifest,
            tile_index,
            counts,
            counts_dirty: false,
            dirty: false,
            writer,
        }
    }

    fn check_coord(&self, coord: &TileCoord) -> Result<(), StoreError> {
        let ndim = self.manifest.slide.ndim();
        if coord.ndim() != ndim {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{}-component coordinate", ndim),
                actual: coord.to_string(),
            });
        }
        Ok(())
    }

    /// Check a tile array against the schema.
    ///
    /// Returns the schema to adopt when none is set yet.
    fn check_tile_array(&self, pixels: &NdArray) -> Result<Option<TileSchema>, StoreError> {
        match &self.manifest.slide.tile_schema {
            Some(schema) => {
                if pixels.shape() != schema.tile_shape.as_slice() || pixels.dtype() != schema.dtype {
                    return Err(StoreError::ShapeMismatch {
                        expected: format!("{} {:?}", schema.dtype, schema.tile_shape),
                        actual: format!("{} {:?}", pixels.dtype(), pixels.shape()),
                    });
                }
                Ok(None)
            }
            None => {
                let ndim = self.manifest.slide.ndim();
                if pixels.ndim() < ndim {
                    return Err(StoreError::ShapeMismatch {
                        expected: format!("tile with at least {} axes", ndim),
                        actual: format!("{:?}", pixels.shape()),
                    });
                }
                Ok(Some(TileSchema {
                    tile_shape: pixels.shape().to_vec(),
                    dtype: pixels.dtype(),
                }))
            }
        }
    }

    fn tile(&self, coord: &TileCoord) -> Result<&TileRecord, StoreError> {
        self.tile_index
            .get(coord)
            .map(|&i| &self.manifest.tiles[i])
            .ok_or_else(|| StoreError::NotFound(format!("tile {}", coord)))
    }

    fn tile_mut(&mut self, coord: &TileCoord) -> Result<&mut TileRecord, StoreError> {
        match self.tile_index.get(coord) {
            Some(&i) => Ok(&mut self.manifest.tiles[i]),
            None => Err(StoreError::NotFound(format!("tile {}", coord))),
        }
    }

    /// Insert or replace a tile record. Replacement keeps the tile's position,
    /// and its masks unless `masks` is given.
    fn upsert_tile(
        &mut self,
        coord: TileCoord,
        pixels: ArrayRecord,
        labels: Labels,
        masks: Option<Vec<MaskRecord>>,
        obs_rows: Option<Vec<String>>,
    ) {
        match self.tile_index.get(&coord) {
            Some(&i) => {
                let record = &mut self.manifest.tiles[i];
                record.pixels = pixels;
                record.labels = labels;
                if let Some(masks) = masks {
                    record.masks = masks;
                }
                if let Some(rows) = obs_rows {
                    record.obs_rows = rows;
                }
            }
            None => {
                self.tile_index.insert(coord.clone(), self.manifest.tiles.len());
                self.manifest.tiles.push(TileRecord {
                    coord,
                    pixels,
                    labels,
                    masks: masks.unwrap_or_default(),
                    obs_rows: obs_rows.unwrap_or_default(),
                });
            }
        }
        self.dirty = true;
    }

    fn masks(&self, scope: &Scope) -> Result<&[MaskRecord], StoreError> {
        match scope {
            Scope::Slide => Ok(&self.manifest.masks),
            Scope::Tile(coord) => Ok(&self.tile(coord)?.masks),
        }
    }

    fn masks_mut(&mut self, scope: &Scope) -> Result<&mut Vec<MaskRecord>, StoreError> {
        match scope {
            Scope::Slide => Ok(&mut self.manifest.masks),
            Scope::Tile(coord) => Ok(&mut self.tile_mut(coord)?.masks),
        }
    }

    fn labels(&self, scope: &Scope) -> Result<&Labels, StoreError> {
        match scope {
            Scope::Slide => Ok(&self.manifest.labels),
            Scope::Tile(coord) => Ok(&self.tile(coord)?.labels),
        }
    }

    fn labels_mut(&mut self, scope: &Scope) -> Result<&mut Labels, StoreError> {
        match scope {
            Scope::Slide => Ok(&mut self.manifest.labels),
            Scope::Tile(coord) => Ok(&mut self.tile_mut(coord)?.labels),
        }
    }

    /// Shape a mask in `scope` must have.
    fn mask_shape(&self, scope: &Scope) -> Result<Vec<usize>, StoreError> {
        match scope {
            Scope::Slide => Ok(self.manifest.slide.shape.clone()),
            Scope::Tile(coord) => {
                let ndim = self.manifest.slide.ndim();
                Ok(self.tile(coord)?.pixels.shape[..ndim].to_vec())
            }
        }
    }

    fn check_mask_for(&self, scope: &Scope, key: &str, mask: &NdArray) -> Result<(), StoreError> {
        check_mask(key, mask)?;
        let expected = self.mask_shape(scope)?;
        if mask.shape() != expected.as_slice() {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{:?} for {} mask '{}'", expected, scope, key),
                actual: format!("{:?}", mask.shape()),
            });
        }
        Ok(())
    }

    async fn write_array(&mut self, array: &NdArray) -> Result<ArrayRecord, StoreError> {
        let offset = self.writer.append(array.data()).await?;
        Ok(ArrayRecord {
            dtype: array.dtype(),
            shape: array.shape().to_vec(),
            blob: BlobRef {
                offset,
                len: array.data().len() as u64,
            },
        })
    }

    /// Bytes to append at `start` to persist the current state: the counts
    /// blob (if it changed), the manifest and the footer.
    fn encode_pending(&mut self, start: u64) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        if self.counts_dirty {
            self.manifest.counts = match &self.counts {
                Some(counts) => {
                    let blob = counts.to_blob()?;
                    let blob_ref = BlobRef {
                        offset: start,
                        len: blob.len() as u64,
                    };
                    out.extend_from_slice(&blob);
                    Some(blob_ref)
                }
                None => None,
            };
        }
        let tail = encode_tail(&self.manifest, start + out.len() as u64)?;
        out.extend_from_slice(&tail);
        Ok(out)
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty && !self.counts_dirty {
            return Ok(());
        }
        let start = self.writer.len();
        let pending = self.encode_pending(start)?;
        self.writer.append(&pending).await?;
        self.dirty = false;
        self.counts_dirty = false;

        debug!(
            path = %self.writer.path.display(),
            manifest_end = start + pending.len() as u64,
            tiles = self.manifest.tiles.len(),
            "Flushed manifest"
        );
        Ok(())
    }
}

fn index_tiles(tiles: &[TileRecord]) -> HashMap<TileCoord, usize> {
    tiles
        .iter()
        .enumerate()
        .map(|(i, t)| (t.coord.clone(), i))
        .collect()
}

// =============================================================================
// Store
// =============================================================================

/// A slide container on disk.
pub struct Store {
    path: PathBuf,
    reader: BlockCache<FileRangeReader>,
    state: RwLock<State>,
}

impl Store {
    /// Create a new container at `path`.
    ///
    /// Fails with `AlreadyExists` if something exists at `path` and
    /// `overwrite` is false. The container is valid on disk when this returns.
    pub async fn create(
        path: impl AsRef<Path>,
        metadata: SlideMetadata,
        overwrite: bool,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        metadata.validate()?;

        match tokio::fs::metadata(path).await {
            Ok(_) if !overwrite => {
                return Err(StoreError::AlreadyExists(path.display().to_string()));
            }
            Ok(_) => {
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| IoError::file(path, e))?;
                debug!(path = %path.display(), "Removed existing container");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IoError::file(path, e).into()),
        }

        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    StoreError::AlreadyExists(path.display().to_string())
                }
                _ => IoError::file(path, e).into(),
            })?;

        let len = Arc::new(AtomicU64::new(0));
        let mut writer = Writer {
            file,
            path: path.to_path_buf(),
            len: len.clone(),
        };
        writer.append(&encode_header()).await?;

        let name = metadata.name.clone();
        let mut state = State::new(Manifest::new(metadata), None, writer);
        state.dirty = true;
        state.flush().await?;

        let reader = FileRangeReader::open_shared(path, len).await?;
        info!(path = %path.display(), slide = %name, "Created container");

        Ok(Self {
            path: path.to_path_buf(),
            reader: BlockCache::new(reader),
            state: RwLock::new(state),
        })
    }

    /// Open an existing container.
    ///
    /// Fails with `NotFound` if nothing exists at `path` and
    /// `CorruptContainer` if the file is not a valid container.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| match IoError::file(path, e) {
                IoError::NotFound(p) => StoreError::NotFound(format!("container {}", p)),
                other => other.into(),
            })?
            .len();

        let len = Arc::new(AtomicU64::new(size));
        let reader = BlockCache::new(FileRangeReader::open_shared(path, len.clone()).await?);
        let manifest = read_manifest(&reader).await?;

        let counts = match &manifest.counts {
            Some(blob) => {
                let bytes = reader.read_exact_at(blob.offset, blob.len as usize).await?;
                Some(Counts::from_blob(&bytes)?)
            }
            None => None,
        };

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| IoError::file(path, e))?;
        let writer = Writer {
            file,
            path: path.to_path_buf(),
            len,
        };

        info!(
            path = %path.display(),
            slide = %manifest.slide.name,
            tiles = manifest.tiles.len(),
            "Opened container"
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            state: RwLock::new(State::new(manifest, counts, writer)),
        })
    }

    /// Path of the backing container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Slide metadata, including the tile schema once known.
    pub async fn metadata(&self) -> SlideMetadata {
        self.state.read().await.manifest.slide.clone()
    }

    async fn read_array(&self, record: &ArrayRecord) -> Result<NdArray, StoreError> {
        let bytes = self
            .reader
            .read_exact_at(record.blob.offset, record.blob.len as usize)
            .await?;
        NdArray::new(record.dtype, record.shape.clone(), bytes)
            .map_err(|e| StoreError::CorruptContainer(e.to_string()))
    }

    // -------------------------------------------------------------------------
    // Tiles
    // -------------------------------------------------------------------------

    /// Insert or replace a tile's pixels and labels.
    ///
    /// Replacing keeps the tile's insertion position and its masks. The first
    /// tile stored fixes the slide's tile schema when none was declared.
    pub async fn put_tile(
        &self,
        coord: impl Into<TileCoord>,
        pixels: NdArray,
        labels: Labels,
    ) -> Result<(), StoreError> {
        let coord = coord.into();
        let mut state = self.state.write().await;
        state.check_coord(&coord)?;
        let schema = state.check_tile_array(&pixels)?;

        let record = state.write_array(&pixels).await?;
        if let Some(schema) = schema {
            state.manifest.slide.tile_schema = Some(schema);
        }
        debug!(coord = %coord, bytes = record.blob.len, "Stored tile");
        state.upsert_tile(coord, record, labels, None, None);
        Ok(())
    }

    /// A tile's pixels and labels.
    pub async fn get_tile(&self, coord: &TileCoord) -> Result<(NdArray, Labels), StoreError> {
        let state = self.state.read().await;
        let record = state.tile(coord)?;
        let pixels = self.read_array(&record.pixels).await?;
        Ok((pixels, record.labels.clone()))
    }

    /// A tile with its pixels, masks and labels.
    pub async fn load_tile(&self, coord: &TileCoord) -> Result<Tile, StoreError> {
        let state = self.state.read().await;
        let record = state.tile(coord)?;

        let mut tile = Tile::new(coord.clone(), self.read_array(&record.pixels).await?);
        tile.labels = record.labels.clone();
        for mask in &record.masks {
            let array = self.read_array(&mask.array).await?;
            tile.masks.add(mask.key.clone(), array)?;
        }
        Ok(tile)
    }

    /// Write a processed tile: pixels, masks and labels replace the stored
    /// record as one unit, and its counts rows are appended to the obs table.
    /// Re-committing a tile with counts replaces the rows it wrote before.
    ///
    /// Either everything is applied or, on error, the previous record of the
    /// tile is left untouched.
    pub async fn commit_tile(&self, tile: Tile) -> Result<(), StoreError> {
        let Tile {
            coord,
            image,
            masks,
            labels,
            counts,
        } = tile;

        let mut state = self.state.write().await;
        state.check_coord(&coord)?;
        let schema = state.check_tile_array(&image)?;

        let spatial = &image.shape()[..coord.ndim()];
        for (key, mask) in masks.iter() {
            check_mask(key, mask)?;
            if mask.shape() != spatial {
                return Err(StoreError::ShapeMismatch {
                    expected: format!("{:?} for mask '{}' of tile {}", spatial, key, coord),
                    actual: format!("{:?}", mask.shape()),
                });
            }
        }

        let pixels = state.write_array(&image).await?;
        let mut mask_records = Vec::with_capacity(masks.len());
        for (key, mask) in masks.iter() {
            mask_records.push(MaskRecord {
                key: key.to_string(),
                array: state.write_array(mask).await?,
            });
        }

        let mut obs_rows = None;
        if let Some(rows) = counts {
            let ids = rows.index().to_vec();
            let old = match state.tile_index.get(&coord) {
                Some(&i) => state.manifest.tiles[i].obs_rows.clone(),
                None => Vec::new(),
            };
            // Writing into absent counts adopts the rows and cannot fail.
            let existing = state.counts.get_or_insert_with(Counts::default);
            existing.obs.replace_rows(&old, rows)?;
            state.counts_dirty = true;
            debug!(coord = %coord, rows = ids.len(), replaced = old.len(), "Wrote obs rows");
            obs_rows = Some(ids);
        }

        if let Some(schema) = schema {
            state.manifest.slide.tile_schema = Some(schema);
        }
        debug!(coord = %coord, masks = mask_records.len(), "Committed tile");
        state.upsert_tile(coord, pixels, labels, Some(mask_records), obs_rows);
        Ok(())
    }

    /// Remove a tile with its masks and labels.
    pub async fn remove_tile(&self, coord: &TileCoord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let index = state
            .tile_index
            .remove(coord)
            .ok_or_else(|| StoreError::NotFound(format!("tile {}", coord)))?;
        state.manifest.tiles.remove(index);
        state.tile_index = index_tiles(&state.manifest.tiles);
        state.dirty = true;
        Ok(())
    }

    /// Stored tile coordinates in insertion order.
    pub async fn tile_coords(&self) -> Vec<TileCoord> {
        let state = self.state.read().await;
        state.manifest.tiles.iter().map(|t| t.coord.clone()).collect()
    }

    pub async fn tile_count(&self) -> usize {
        self.state.read().await.manifest.tiles.len()
    }

    pub async fn contains_tile(&self, coord: &TileCoord) -> bool {
        self.state.read().await.tile_index.contains_key(coord)
    }

    // -------------------------------------------------------------------------
    // Masks
    // -------------------------------------------------------------------------

    /// Mask view over one scope.
    pub fn masks(&self, scope: impl Into<Scope>) -> MaskCollection<'_> {
        MaskCollection::new(self, scope.into())
    }

    /// Insert or overwrite a mask. An overwritten key keeps its position.
    pub async fn put_mask(&self, scope: &Scope, key: &str, mask: NdArray) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_mask_for(scope, key, &mask)?;

        let array = state.write_array(&mask).await?;
        let masks = state.masks_mut(scope)?;
        match masks.iter_mut().find(|m| m.key == key) {
            Some(existing) => existing.array = array,
            None => masks.push(MaskRecord {
                key: key.to_string(),
                array,
            }),
        }
        state.dirty = true;
        debug!(scope = %scope, key = key, "Stored mask");
        Ok(())
    }

    /// Insert a new mask; `DuplicateKey` if the key exists in `scope`.
    pub async fn add_mask(&self, scope: &Scope, key: &str, mask: NdArray) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_mask_for(scope, key, &mask)?;
        if state.masks(scope)?.iter().any(|m| m.key == key) {
            return Err(StoreError::DuplicateKey(format!("{} mask '{}'", scope, key)));
        }

        let array = state.write_array(&mask).await?;
        state.masks_mut(scope)?.push(MaskRecord {
            key: key.to_string(),
            array,
        });
        state.dirty = true;
        debug!(scope = %scope, key = key, "Added mask");
        Ok(())
    }

    pub async fn get_mask(&self, scope: &Scope, key: &str) -> Result<NdArray, StoreError> {
        let state = self.state.read().await;
        let record = state
            .masks(scope)?
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| StoreError::NotFound(format!("{} mask '{}'", scope, key)))?;
        self.read_array(&record.array).await
    }

    /// Remove a mask; `NotFound` if absent.
    pub async fn remove_mask(&self, scope: &Scope, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let masks = state.masks_mut(scope)?;
        let pos = masks
            .iter()
            .position(|m| m.key == key)
            .ok_or_else(|| StoreError::NotFound(format!("{} mask '{}'", scope, key)))?;
        masks.remove(pos);
        state.dirty = true;
        Ok(())
    }

    /// Mask keys of a scope in insertion order.
    pub async fn mask_keys(&self, scope: &Scope) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.masks(scope)?.iter().map(|m| m.key.clone()).collect())
    }

    // -------------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------------

    /// Set a label, overwriting any previous value under `key`.
    pub async fn put_label(
        &self,
        scope: &Scope,
        key: &str,
        value: impl Into<LabelValue>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.labels_mut(scope)?.insert(key, value)?;
        state.dirty = true;
        Ok(())
    }

    pub async fn get_label(&self, scope: &Scope, key: &str) -> Result<LabelValue, StoreError> {
        let state = self.state.read().await;
        state
            .labels(scope)?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} label '{}'", scope, key)))
    }

    /// Remove a label and return its value; `NotFound` if absent.
    pub async fn remove_label(&self, scope: &Scope, key: &str) -> Result<LabelValue, StoreError> {
        let mut state = self.state.write().await;
        let value = state
            .labels_mut(scope)?
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(format!("{} label '{}'", scope, key)))?;
        state.dirty = true;
        Ok(value)
    }

    /// All labels of a scope.
    pub async fn labels(&self, scope: &Scope) -> Result<Labels, StoreError> {
        let state = self.state.read().await;
        Ok(state.labels(scope)?.clone())
    }

    // -------------------------------------------------------------------------
    // Counts
    // -------------------------------------------------------------------------

    /// Replace the slide's counts.
    pub async fn put_counts(&self, counts: Counts) -> Result<(), StoreError> {
        counts.obs.validate()?;
        counts.var.validate()?;
        let mut state = self.state.write().await;
        state.counts = Some(counts);
        state.counts_dirty = true;
        Ok(())
    }

    /// The slide's counts; `None` when never set (distinct from empty tables).
    pub async fn get_counts(&self) -> Option<Counts> {
        self.state.read().await.counts.clone()
    }

    /// Append rows to the obs table, creating counts if absent.
    pub async fn append_obs(&self, rows: Table) -> Result<(), StoreError> {
        rows.validate()?;
        let mut state = self.state.write().await;
        let counts = state.counts.get_or_insert_with(Counts::default);
        counts.obs.append(rows)?;
        state.counts_dirty = true;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Persist the manifest so the file reflects every completed write.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.state.write().await.flush().await
    }

    /// Flush and release the container.
    pub async fn close(self) -> Result<(), StoreError> {
        self.flush().await?;
        debug!(path = %self.path.display(), "Closed container");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.dirty && !state.counts_dirty {
            return;
        }

        let start = state.writer.len();
        let result = state
            .encode_pending(start)
            .and_then(|pending| state.writer.append_blocking(&pending));
        match result {
            Ok(()) => debug!(path = %self.path.display(), "Flushed container on drop"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to flush container on drop"
            ),
        }
    }
}
