use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use geobatch_core::config::CliConfigOverrides;

/// GeoBatch - Adaptive batch extraction of per-plot raster statistics
#[derive(Parser, Debug)]
#[command(name = "geobatch")]
#[command(about = "Adaptive batch extraction of per-plot raster statistics", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to ./geobatch.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the largest tile that fits the remote payload limit
    Plan(PlanArgs),

    /// Profile a plot file and suggest an execution mode
    Suggest(SuggestArgs),

    /// Build a mosaic over a tile directory and describe it
    Mosaic(MosaicArgs),

    /// Run a full batch and write the result table
    Run(RunArgs),

    /// Show the resolved configuration and where each value came from
    Config,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Number of bands in the raster expression
    #[arg(long)]
    pub bands: u32,

    /// Pixel size in meters
    #[arg(long)]
    pub scale: Option<f64>,

    /// Latitude the tile is planned for, in degrees
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub latitude: f64,

    /// Remote payload limit in bytes
    #[arg(long)]
    pub byte_limit: Option<u64>,

    /// Bytes per band per pixel
    #[arg(long)]
    pub bytes_per_band: Option<u32>,

    /// Fraction of the payload limit to use, in (0, 1]
    #[arg(long)]
    pub margin: Option<f64>,
}

impl PlanArgs {
    pub fn overrides(&self) -> CliConfigOverrides {
        CliConfigOverrides {
            scale_m: self.scale,
            safety_margin: self.margin,
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug)]
pub struct SuggestArgs {
    /// GeoJSON file with the plots
    pub plots: PathBuf,

    /// Property holding the external plot identifier
    #[arg(long)]
    pub id_property: Option<String>,
}

#[derive(Parser, Debug)]
pub struct MosaicArgs {
    /// Directory holding the tiles (defaults to the configured tile_dir)
    pub tile_dir: Option<PathBuf>,

    /// Regular expression for tile file names to leave out
    #[arg(long)]
    pub exclude: Option<String>,

    /// Write a GDAL VRT describing the mosaic
    #[arg(long, value_name = "FILE")]
    pub vrt: Option<PathBuf>,
}

impl MosaicArgs {
    pub fn overrides(&self) -> CliConfigOverrides {
        CliConfigOverrides {
            exclude_pattern: self.exclude.clone(),
            tile_dir: self.tile_dir.clone(),
            ..Default::default()
        }
    }
}

/// Execution mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Let the workload profile decide between sequential and concurrent
    Auto,
    /// Remote reduction, one chunk at a time
    Sequential,
    /// Remote reduction, several chunks at once
    Concurrent,
    /// Download tiles and reduce them locally
    Local,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// GeoJSON file with the plots
    pub plots: PathBuf,

    /// TOML file declaring the raster layers
    #[arg(long)]
    pub layers: PathBuf,

    /// CSV file for the result table
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Execution mode
    #[arg(long, value_enum, default_value = "auto")]
    pub mode: ModeArg,

    /// Property holding the external plot identifier
    #[arg(long)]
    pub id_property: Option<String>,

    /// Reductions to compute (sum, mean, min, max, count)
    #[arg(long, value_delimiter = ',', default_value = "sum")]
    pub operations: Vec<String>,

    /// Base URL of the remote compute service
    #[arg(long)]
    pub service_url: Option<String>,

    /// Directory for downloaded tiles
    #[arg(long)]
    pub tile_dir: Option<PathBuf>,

    /// Concurrent downloads or remote chunks
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Threads for local extraction
    #[arg(long)]
    pub max_extract_workers: Option<usize>,

    /// Plots per extraction or reduction chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Attempts per tile or chunk
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pixel size in meters
    #[arg(long)]
    pub scale: Option<f64>,

    /// Fraction of the payload limit to use, in (0, 1]
    #[arg(long)]
    pub margin: Option<f64>,

    /// Delete tile files after a successful extraction
    #[arg(long)]
    pub cleanup: bool,

    /// Decoy tiles requested per real tile
    #[arg(long, default_value = "0")]
    pub decoys: usize,

    /// Minimum decoy shift in kilometers
    #[arg(long, default_value = "1.0")]
    pub decoy_min_km: f64,

    /// Maximum decoy shift in kilometers
    #[arg(long, default_value = "5.0")]
    pub decoy_max_km: f64,

    /// Seed for decoy placement
    #[arg(long)]
    pub seed: Option<u64>,

    /// Rows of the result table to print
    #[arg(long, default_value = "10")]
    pub preview: usize,
}

impl RunArgs {
    pub fn overrides(&self) -> CliConfigOverrides {
        CliConfigOverrides {
            max_workers: self.max_workers,
            max_extract_workers: self.max_extract_workers,
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            scale_m: self.scale,
            safety_margin: self.margin,
            exclude_pattern: None,
            cleanup_files: self.cleanup.then_some(true),
            service_url: self.service_url.clone(),
            tile_dir: self.tile_dir.clone(),
        }
    }
}
