use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::RangeReader;
use crate::error::IoError;

/// Local-file implementation of [`RangeReader`].
///
/// The readable length is tracked in a shared counter rather than queried
/// from the filesystem: the store's writer bumps it after each append is
/// flushed, so readers never observe a half-written blob.
pub struct FileRangeReader {
    file: Mutex<File>,
    path: PathBuf,
    len: Arc<AtomicU64>,
    identifier: String,
}

impl FileRangeReader {
    /// Open `path` for reading, using the file's current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| IoError::file(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::file(path, e))?
            .len();

        Ok(Self::with_length(file, path, Arc::new(AtomicU64::new(size))))
    }

    /// Open `path` for reading with an externally maintained length.
    pub async fn open_shared(path: impl AsRef<Path>, len: Arc<AtomicU64>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| IoError::file(path, e))?;
        Ok(Self::with_length(file, path, len))
    }

    fn with_length(file: File, path: &Path, len: Arc<AtomicU64>) -> Self {
        Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            len,
            identifier: format!("file://{}", path.display()),
        }
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.size();
        if offset + len as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::file(&self.path, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::file(&self.path, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
