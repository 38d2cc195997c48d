//! On-disk container format.
//!
//! A slide is persisted as one file: a fixed header, an append-only region of
//! raw blobs, and a JSON [`Manifest`] indexing those blobs, closed by a footer
//! carrying the manifest's location and SHA-256 digest. See [`container`] for
//! the byte layout.

pub mod container;
mod manifest;

pub use container::{
    encode_header, encode_tail, read_manifest, Footer, FOOTER_SIZE, HEADER_SIZE, SCHEMA_VERSION,
};
pub use manifest::{
    ArrayRecord, BlobRef, Manifest, MaskRecord, SlideMetadata, TileRecord, TileSchema,
};
