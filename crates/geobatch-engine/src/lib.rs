//! GeoBatch Engine - Adaptive batch extraction of per-plot raster statistics
//!
//! This crate implements the batch use case: sizing tiles under the remote
//! payload ceiling, choosing between remote and local execution, downloading
//! tiles through a bounded worker pool, assembling them into a mosaic, and
//! extracting and merging zonal statistics into one row per plot.

pub mod aggregate;
pub mod download;
pub mod extract;
pub mod mode;
pub mod mosaic;
pub mod pipeline;
pub mod planner;
pub mod raster;
pub mod remote;
pub mod tiling;
pub mod zonal;

pub use aggregate::{merge, merge_into_schema, missing_ids};
pub use download::{
    backoff_delay, download_all, DownloadOptions, DownloadTask, HttpRemoteService, TaskResult,
    TaskState,
};
pub use extract::{extract_in_chunks, extract_in_chunks_cancellable, ExtractionOutcome, ZonalStatistics};
pub use mode::{breakeven_threshold, suggest_mode, suggest_mode_for};
pub use mosaic::{build_mosaic, build_mosaic_with_bands, Mosaic, MosaicTile};
pub use pipeline::{profile_and_suggest, BatchOutcome, BatchPipeline, BatchSummary};
pub use planner::{plan_tile, TilePlan, TilePlanner};
pub use raster::{encode_geotiff, read_geotiff, write_geotiff, GeoTransform, RasterTile};
pub use remote::{reduce_remote, RemoteOutcome};
pub use tiling::{plan_regions, plot_regions, tasks_for_regions, tile_file_stem};
pub use zonal::PixelZonalStatistics;
