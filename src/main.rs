//! `rastertensor` CLI - run an image through a tensor inference pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rastertensor::backend::BackendKind;
use rastertensor::raw::SaveRawConfig;
use rastertensor::tiling::TileSize;
use rastertensor::{Pipeline, PipelineConfig};

/// Run an image through a configurable tensor inference pipeline.
#[derive(Parser, Debug)]
#[command(name = "rastertensor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input image path.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output image path.
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// JSON pipeline configuration.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model file (.onnx or TF.js model.json).
    #[arg(short, long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Inference backend; inferred from the model extension when omitted.
    #[arg(short, long, value_enum)]
    backend: Option<BackendArg>,

    /// Enable tiled inference with square tiles of this size.
    #[arg(long, value_name = "INT")]
    tile: Option<u32>,

    /// Tile overlap in pixels.
    #[arg(long, value_name = "INT")]
    overlap: Option<u32>,

    /// Also dump the raw output tensor (.npy or .npz).
    #[arg(long, value_name = "PATH")]
    raw: Option<PathBuf>,

    /// Output JPEG quality (1-100).
    #[arg(short, long, value_name = "INT")]
    quality: Option<u8>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Noop,
    Onnx,
    Tfjs,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Noop => Self::Noop,
            BackendArg::Onnx => Self::Onnx,
            BackendArg::Tfjs => Self::Tfjs,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rastertensor={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Load the config file (if any) and apply command-line overrides.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(model) = &args.model {
        config.inference.model = Some(model.clone());
    }
    if let Some(backend) = args.backend {
        config.inference.backend = Some(backend.into());
    }
    if let Some(tile) = args.tile {
        config.inference.tiling.apply = true;
        config.inference.tiling.tile_size = TileSize::Square(tile);
    }
    if let Some(overlap) = args.overlap {
        config.inference.tiling.overlap = overlap;
    }
    if let Some(raw) = &args.raw {
        let save_raw = config
            .output
            .save_raw
            .take()
            .unwrap_or_else(|| SaveRawConfig::new(raw));
        config.output.save_raw = Some(save_raw.with_path(raw));
    }
    if let Some(quality) = args.quality {
        config.output.quality = quality;
    }

    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    // Validate input file exists
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let config = build_config(args)?;

    // Create and run pipeline
    let mut pipeline = Pipeline::new(config).context("Failed to initialize pipeline")?;

    pipeline
        .process(&args.input, &args.output)
        .context("Failed to process image")?;

    println!(
        "Successfully processed {} -> {}",
        args.input.display(),
        args.output.display()
    );

    Ok(())
}
