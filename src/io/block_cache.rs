use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 64KB.
///
/// Container reads are either small (header, footer) or whole array blobs,
/// so blocks are kept modest to avoid caching large runs of dead bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (16MB with the default block size).
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 256;

/// Block-based read cache over an append-only container file.
///
/// - Fixed-size blocks with LRU eviction
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Reads spanning several blocks are stitched together
///
/// The wrapped resource may grow while the cache is alive (the store appends
/// blobs to its backing file). Bytes below the current end never change, so a
/// full block is immutable once fetched. The trailing partial block is never
/// cached: a later append would extend it.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// A zero capacity is treated as one block.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Access the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of blocks currently cached.
    pub async fn cached_blocks(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn cached(&self, block: u64) -> Option<Bytes> {
        self.cache.read().await.peek(&block).cloned()
    }

    /// Return block `block`, fetching it at most once across concurrent callers.
    async fn block(&self, block: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cached(block).await {
                return Ok(data);
            }

            let mut in_flight = self.in_flight.lock().await;
            if let Some(pending) = in_flight.get(&block).cloned() {
                // Subscribe while holding the map so the wakeup cannot be missed.
                let notified = pending.notified();
                drop(in_flight);
                notified.await;
                continue;
            }
            let done = Arc::new(Notify::new());
            in_flight.insert(block, done.clone());
            drop(in_flight);

            let fetched = self.fetch(block).await;
            if let Ok(data) = &fetched {
                if data.len() == self.block_size {
                    self.cache.write().await.put(block, data.clone());
                }
            }
            self.in_flight.lock().await.remove(&block);
            done.notify_waiters();
            return fetched;
        }
    }

    async fn fetch(&self, block: u64) -> Result<Bytes, IoError> {
        let start = block * self.block_size as u64;
        let end = self.inner.size().min(start + self.block_size as u64);
        if end <= start {
            return Err(IoError::RangeOutOfBounds {
                offset: start,
                requested: self.block_size as u64,
                size: self.inner.size(),
            });
        }
        self.inner.read_exact_at(start, (end - start) as usize).await
    }

    /// Block index and offset within that block.
    fn locate(&self, offset: u64) -> (u64, usize) {
        let size = self.block_size as u64;
        (offset / size, (offset % size) as usize)
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        let out_of_bounds = IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        };
        if offset + len as u64 > size {
            return Err(out_of_bounds);
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let (first, within) = self.locate(offset);
        let (last, _) = self.locate(offset + len as u64 - 1);

        // Single block: hand out a slice of the cached buffer.
        if first == last {
            let data = self.block(first).await?;
            if within + len > data.len() {
                return Err(out_of_bounds);
            }
            return Ok(data.slice(within..within + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut skip = within;
        for index in first..=last {
            let data = self.block(index).await?;
            let take = data.len().saturating_sub(skip).min(len - out.len());
            if take == 0 {
                return Err(out_of_bounds);
            }
            out.extend_from_slice(&data[skip..skip + take]);
            skip = 0;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
