//! WSI Tile Store - tile, store and process Whole Slide Images.
//!
//! This binary wires the library's operations to the command line.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tilestore::{
    config::{Cli, Command, ExportConfig, ExportFormat, InspectConfig, InspectFormat, TileConfig},
    pipeline::{Pipeline, PipelineEngine, Scheduling, TokioWorkerPool},
    slide::{encode_jpeg, encode_png, ImageDecoder, Slide, SlideOptions},
    store::{Scope, Store},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Tile(config) => run_tile(config).await,
        Command::Inspect(config) => run_inspect(config).await,
        Command::Export(config) => run_export(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tilestore=debug"
    } else {
        "wsi_tilestore=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let labels = match config.parse_labels() {
        Ok(labels) => labels,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let output = config.output_path();
    info!("Configuration:");
    info!("  Input: {}", config.input.display());
    info!("  Output: {}", output.display());
    info!(
        "  Tiles: {} px, stride {} px, padding {}",
        config.tile_size,
        config.stride_or_tile(),
        if config.pad { "on" } else { "off" }
    );

    let decoder = match ImageDecoder::open(&config.input).await {
        Ok(decoder) => decoder,
        Err(e) => {
            error!("Failed to read {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let options = SlideOptions::new(config.tile_size)
        .with_stride(config.stride_or_tile())
        .with_padding(config.pad)
        .with_overwrite(config.overwrite)
        .with_labels(labels);
    let slide = match Slide::create(&output, config.slide_name(), decoder, options).await {
        Ok(slide) => slide,
        Err(e) => {
            error!("Failed to create {}: {}", output.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let engine = PipelineEngine::new(Pipeline::named("ingest"))
        .with_max_in_flight(config.max_in_flight);
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current tile");
            token.cancel();
        }
    });

    let result = if config.workers == 0 {
        slide.run_with(&engine, Scheduling::Local).await
    } else {
        let pool = TokioWorkerPool::start(config.workers);
        let result = slide
            .run_with(&engine, Scheduling::Distributed(&pool))
            .await;
        pool.shutdown().await;
        result
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("Tiling failed: {}", e);
            if let Err(e) = slide.close().await {
                error!("Failed to close {}: {}", output.display(), e);
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = slide.close().await {
        error!("Failed to close {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "Stored {} tile(s) in {} ({} ms)",
        summary.tiles_committed,
        output.display(),
        summary.duration.as_millis()
    );
    ExitCode::SUCCESS
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let store = match Store::open(&config.container).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let metadata = store.metadata().await;
    let coords = store.tile_coords().await;
    let (labels, masks) = match (
        store.labels(&Scope::Slide).await,
        store.mask_keys(&Scope::Slide).await,
    ) {
        (Ok(labels), Ok(masks)) => (labels, masks),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let counts = store.get_counts().await;

    match config.format {
        InspectFormat::Json => {
            let labels: serde_json::Map<String, serde_json::Value> = labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect();
            let mut json = serde_json::json!({
                "name": metadata.name,
                "shape": metadata.shape,
                "tile_schema": metadata.tile_schema.as_ref().map(|s| serde_json::json!({
                    "tile_shape": s.tile_shape,
                    "dtype": s.dtype.name(),
                })),
                "tile_count": coords.len(),
                "labels": labels,
                "masks": masks,
                "counts": counts.as_ref().map(|c| serde_json::json!({
                    "obs_rows": c.obs.n_rows(),
                    "obs_columns": c.obs.column_names(),
                    "var_rows": c.var.n_rows(),
                })),
            });
            if config.tiles {
                json["tiles"] = coords.iter().map(|c| c.to_string()).collect();
            }
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        InspectFormat::Text => {
            println!("Slide: {}", metadata.name);
            println!("  Path:   {}", config.container.display());
            println!("  Shape:  {:?}", metadata.shape);
            match &metadata.tile_schema {
                Some(schema) => println!(
                    "  Tiles:  {} x {:?} {}",
                    coords.len(),
                    schema.tile_shape,
                    schema.dtype
                ),
                None => println!("  Tiles:  none"),
            }
            if !labels.is_empty() {
                println!("  Labels:");
                for (key, value) in labels.iter() {
                    println!("    {} = {}", key, value.to_json());
                }
            }
            if !masks.is_empty() {
                println!("  Masks:  {}", masks.join(", "));
            }
            match &counts {
                Some(c) => println!(
                    "  Counts: {} obs row(s) [{}], {} var row(s)",
                    c.obs.n_rows(),
                    c.obs.column_names().join(", "),
                    c.var.n_rows()
                ),
                None => println!("  Counts: none"),
            }
            if config.tiles {
                println!();
                for coord in &coords {
                    println!("  {}", coord);
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Export Command
// =============================================================================

async fn run_export(config: ExportConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let slide = match Slide::open(&config.container).await {
        Ok(slide) => slide,
        Err(e) => {
            error!("Failed to open {}: {}", config.container.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let array = match (&config.mask, config.parse_window()) {
        (Some(key), _) => slide.masks().get(key).await.map_err(|e| e.to_string()),
        (None, Ok(Some(window))) => slide.stitch(window).await.map_err(|e| e.to_string()),
        (None, Ok(None)) => slide.stitch_all().await.map_err(|e| e.to_string()),
        (None, Err(e)) => Err(e),
    };
    let array = match array {
        Ok(array) => array,
        Err(e) => {
            error!("Export failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let encoded = match config.format {
        ExportFormat::Png => encode_png(&array),
        ExportFormat::Jpeg => encode_jpeg(&array, config.quality),
    };
    let encoded = match encoded {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Export failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(&config.output, &encoded).await {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "Exported {:?} {} to {} ({} bytes)",
        array.shape(),
        array.dtype(),
        config.output.display(),
        encoded.len()
    );
    ExitCode::SUCCESS
}
