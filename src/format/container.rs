//! Container file layout.
//!
//! ```text
//! ┌──────────────────────────────┐ 0
//! │ header (16 bytes)            │  magic "WSITSTOR", schema version (u32 LE), reserved
//! ├──────────────────────────────┤ 16
//! │ blob region (append-only)    │  raw array bytes, counts blobs, older manifests
//! ├──────────────────────────────┤ manifest offset
//! │ manifest (JSON)              │
//! ├──────────────────────────────┤
//! │ footer (56 bytes)            │  manifest offset (u64 LE), manifest length (u64 LE),
//! │                              │  SHA-256 of the manifest, end magic "WSITEND\0"
//! └──────────────────────────────┘ file length
//! ```
//!
//! Every flush appends a new manifest and footer after the blobs written
//! since the previous one. Only the last footer is authoritative; earlier
//! manifests become dead bytes in the blob region.

use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::io::{read_u32_le, read_u64_le, RangeReader};

use super::Manifest;

/// Leading magic bytes.
pub const MAGIC: &[u8; 8] = b"WSITSTOR";

/// Trailing magic bytes.
pub const END_MAGIC: &[u8; 8] = b"WSITEND\0";

/// Current (and only supported) schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 56;

/// Manifests larger than this are rejected as corrupt.
const MAX_MANIFEST_SIZE: u64 = 1 << 30;

// =============================================================================
// Header
// =============================================================================

/// Encode the container header.
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[..8].copy_from_slice(MAGIC);
    out[8..12].copy_from_slice(&SCHEMA_VERSION.to_le_bytes());
    out
}

/// Validate a container header.
pub fn parse_header(bytes: &[u8]) -> Result<(), StoreError> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::CorruptContainer(format!(
            "header is {} bytes, expected {}",
            bytes.len(),
            HEADER_SIZE
        )));
    }
    if &bytes[..8] != MAGIC {
        return Err(StoreError::CorruptContainer("bad magic".to_string()));
    }
    let version = read_u32_le(&bytes[8..12]);
    if version != SCHEMA_VERSION {
        return Err(StoreError::CorruptContainer(format!(
            "unsupported schema version {} (expected {})",
            version, SCHEMA_VERSION
        )));
    }
    Ok(())
}

// =============================================================================
// Footer
// =============================================================================

/// Trailer pointing at the current manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub manifest_offset: u64,
    pub manifest_len: u64,
    pub digest: [u8; 32],
}

impl Footer {
    /// Footer for `manifest` stored at `offset`.
    pub fn for_manifest(offset: u64, manifest: &[u8]) -> Self {
        Self {
            manifest_offset: offset,
            manifest_len: manifest.len() as u64,
            digest: Sha256::digest(manifest).into(),
        }
    }

    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(&self.manifest_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.manifest_len.to_le_bytes());
        out[16..48].copy_from_slice(&self.digest);
        out[48..56].copy_from_slice(END_MAGIC);
        out
    }

    /// Parse a footer read from the end of a file of `file_size` bytes.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, StoreError> {
        if bytes.len() != FOOTER_SIZE {
            return Err(StoreError::CorruptContainer(format!(
                "footer is {} bytes, expected {}",
                bytes.len(),
                FOOTER_SIZE
            )));
        }
        if &bytes[48..56] != END_MAGIC {
            return Err(StoreError::CorruptContainer("bad end magic".to_string()));
        }

        let manifest_offset = read_u64_le(&bytes[0..8]);
        let manifest_len = read_u64_le(&bytes[8..16]);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[16..48]);

        let footer_start = file_size - FOOTER_SIZE as u64;
        let in_bounds = manifest_offset >= HEADER_SIZE as u64
            && manifest_len <= MAX_MANIFEST_SIZE
            && manifest_offset
                .checked_add(manifest_len)
                .is_some_and(|end| end == footer_start);
        if !in_bounds {
            return Err(StoreError::CorruptContainer(format!(
                "manifest range {}+{} does not end at footer ({})",
                manifest_offset, manifest_len, footer_start
            )));
        }

        Ok(Self {
            manifest_offset,
            manifest_len,
            digest,
        })
    }

    /// Check the manifest bytes against the recorded digest.
    pub fn verify(&self, manifest: &[u8]) -> Result<(), StoreError> {
        let actual: [u8; 32] = Sha256::digest(manifest).into();
        if actual != self.digest {
            return Err(StoreError::CorruptContainer(format!(
                "manifest digest mismatch: footer has {}, manifest hashes to {}",
                hex::encode(self.digest),
                hex::encode(actual)
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Reading and writing
// =============================================================================

/// Encode `manifest` followed by its footer, to be appended at `offset`.
pub fn encode_tail(manifest: &Manifest, offset: u64) -> Result<Vec<u8>, StoreError> {
    let json = manifest.to_json()?;
    let footer = Footer::for_manifest(offset, &json);

    let mut out = Vec::with_capacity(json.len() + FOOTER_SIZE);
    out.extend_from_slice(&json);
    out.extend_from_slice(&footer.encode());
    Ok(out)
}

/// Read and validate the current manifest of a container.
///
/// Checks, in order: minimum size, header magic and version, footer magic
/// and bounds, manifest digest, manifest decoding and manifest references.
pub async fn read_manifest<R: RangeReader>(reader: &R) -> Result<Manifest, StoreError> {
    let size = reader.size();
    if size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
        return Err(StoreError::CorruptContainer(format!(
            "{} is too small to be a container ({} bytes)",
            reader.identifier(),
            size
        )));
    }

    let header = reader.read_exact_at(0, HEADER_SIZE).await?;
    parse_header(&header)?;

    let footer_bytes = reader
        .read_exact_at(size - FOOTER_SIZE as u64, FOOTER_SIZE)
        .await?;
    let footer = Footer::parse(&footer_bytes, size)?;

    let manifest_bytes = reader
        .read_exact_at(footer.manifest_offset, footer.manifest_len as usize)
        .await?;
    footer.verify(&manifest_bytes)?;

    let manifest = Manifest::from_json(&manifest_bytes)?;
    manifest.validate(footer.manifest_offset)?;
    Ok(manifest)
}
