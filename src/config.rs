//! Configuration for the `wsi-tilestore` binary.
//!
//! This module provides the command-line interface:
//! - Subcommands via clap derive
//! - Environment variables with `TILESTORE_` prefix for tuning knobs
//! - Named defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_tilestore::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Command::Tile(config) => { /* ... */ }
//!     Command::Inspect(config) => { /* ... */ }
//!     Command::Export(config) => { /* ... */ }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `TILESTORE_TILE_SIZE` - Tile edge length in pixels (default: 256)
//! - `TILESTORE_STRIDE` - Step between tile origins (default: tile size)
//! - `TILESTORE_WORKERS` - Worker count; 0 runs locally (default: 0)
//! - `TILESTORE_MAX_IN_FLIGHT` - Distributed tasks in flight (default: 64)
//! - `TILESTORE_JPEG_QUALITY` - JPEG export quality (default: 80)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::pipeline::DEFAULT_MAX_IN_FLIGHT;
use crate::slide::{DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};
use crate::store::{LabelValue, Labels};
use crate::tile::Region;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge length.
pub const DEFAULT_TILE_SIZE: usize = 256;

/// Default worker count (0 = local scheduling).
pub const DEFAULT_WORKERS: usize = 0;

/// File extension of containers.
pub const CONTAINER_EXTENSION: &str = "wsit";

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Tile Store - tile, store and process Whole Slide Images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tilestore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Tile an image into a new container.
    Tile(TileConfig),

    /// Print a container's contents.
    Inspect(InspectConfig),

    /// Export a stitched window or a slide mask as an image.
    Export(ExportConfig),
}

// =============================================================================
// tile
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Source image (PNG, JPEG or TIFF).
    pub input: PathBuf,

    /// Container to write. Defaults to the input path with a `.wsit` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Slide name. Defaults to the input file stem.
    #[arg(long)]
    pub name: Option<String>,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILESTORE_TILE_SIZE")]
    pub tile_size: usize,

    /// Step between tile origins. Smaller than the tile size makes tiles overlap.
    #[arg(long, env = "TILESTORE_STRIDE")]
    pub stride: Option<usize>,

    /// Keep partial edge tiles, zero-padded to the full tile size.
    #[arg(long, default_value_t = false)]
    pub pad: bool,

    /// Number of workers. 0 processes tiles one at a time on the main task.
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "TILESTORE_WORKERS")]
    pub workers: usize,

    /// Bound on distributed tasks submitted but not yet committed.
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT, env = "TILESTORE_MAX_IN_FLIGHT")]
    pub max_in_flight: usize,

    /// Replace an existing container.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Slide label as `key=value` (repeatable). Values are parsed as JSON,
    /// falling back to a plain string.
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl TileConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.stride == Some(0) {
            return Err("stride must be greater than 0".to_string());
        }
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than 0".to_string());
        }
        self.parse_labels().map(|_| ())
    }

    /// Container path, derived from the input when not given.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension(CONTAINER_EXTENSION))
    }

    /// Slide name, derived from the input file stem when not given.
    pub fn slide_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "slide".to_string())
        })
    }

    /// Stride, defaulting to the tile size.
    pub fn stride_or_tile(&self) -> usize {
        self.stride.unwrap_or(self.tile_size)
    }

    /// Parse the `--label key=value` arguments.
    pub fn parse_labels(&self) -> Result<Labels, String> {
        let mut labels = Labels::new();
        for raw in &self.labels {
            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| format!("label '{}' must be key=value", raw))?;
            let value = match serde_json::from_str::<serde_json::Value>(value) {
                Ok(json) => LabelValue::from_json(&json)
                    .map_err(|e| format!("label '{}': {}", key, e))?,
                Err(_) => LabelValue::from(value),
            };
            labels
                .insert(key, value)
                .map_err(|e| format!("label '{}': {}", raw, e))?;
        }
        Ok(labels)
    }
}

// =============================================================================
// inspect
// =============================================================================

/// Output format for `inspect`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InspectFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON document
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Container to inspect.
    pub container: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = InspectFormat::Text)]
    pub format: InspectFormat,

    /// List every tile coordinate.
    #[arg(long, default_value_t = false)]
    pub tiles: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// export
// =============================================================================

/// Image format for `export`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Args, Debug, Clone)]
pub struct ExportConfig {
    /// Container to read.
    pub container: PathBuf,

    /// Image file to write.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Window to export as `row,col,height,width`. Defaults to the whole slide.
    #[arg(long)]
    pub window: Option<String>,

    /// Export this slide mask instead of the stitched pixels.
    #[arg(long)]
    pub mask: Option<String>,

    /// Output image format.
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Png)]
    pub format: ExportFormat,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILESTORE_JPEG_QUALITY")]
    pub quality: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ExportConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&self.quality) {
            return Err(format!(
                "quality must be between {} and {}",
                MIN_JPEG_QUALITY, MAX_JPEG_QUALITY
            ));
        }
        if self.mask.is_some() && self.window.is_some() {
            return Err("--window cannot be combined with --mask".to_string());
        }
        self.parse_window().map(|_| ())
    }

    /// Parse `--window`.
    pub fn parse_window(&self) -> Result<Option<Region>, String> {
        let Some(raw) = &self.window else {
            return Ok(None);
        };
        let values = raw
            .split(',')
            .map(|v| v.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid window '{}': {}", raw, e))?;
        match values.as_slice() {
            [row, col, height, width] if *height > 0 && *width > 0 => {
                Ok(Some(Region::new(vec![*row, *col], vec![*height, *width])))
            }
            _ => Err(format!(
                "window '{}' must be row,col,height,width with a non-empty size",
                raw
            )),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
