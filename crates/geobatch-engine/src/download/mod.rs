//! Tile download worker pool and its remote service adapter.

mod http;
mod pool;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use geobatch_core::config::EngineSettings;
use geobatch_core::error::GeobatchError;
use geobatch_core::models::{Bounds, Geometry};
use geobatch_geo::TileRegion;

pub use http::HttpRemoteService;
pub use pool::download_all;

/// Terminal state of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Success,
    Failed,
}

/// One tile to fetch into one file
///
/// Owned by a single worker while it runs; no two tasks share a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    /// Clip rectangle sent to the remote service
    pub region: Geometry,
    pub bounds: Bounds,
    pub destination: PathBuf,
    /// Ingestion index of the plot this tile serves; `None` for decoys
    pub plot_index: Option<usize>,
    pub attempts: u32,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(region: &TileRegion, tile_dir: &Path, plot_index: Option<usize>) -> Self {
        Self {
            region: Geometry::rectangle(&region.bounds),
            bounds: region.bounds,
            destination: tile_dir.join(format!("{}.tif", region.file_stem)),
            plot_index: if region.decoy { None } else { plot_index },
            attempts: 0,
            state: TaskState::Pending,
        }
    }

    pub fn is_decoy(&self) -> bool {
        self.plot_index.is_none()
    }

    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Temporary path the payload is written to before the final rename
    pub fn partial_path(&self) -> PathBuf {
        self.destination.with_extension("tif.part")
    }
}

/// Outcome of one task
#[derive(Debug)]
pub struct TaskResult {
    pub task: DownloadTask,
    /// Last error for failed tasks, or why a task never ran
    pub error: Option<GeobatchError>,
    /// Completed from a file left by an earlier run
    pub resumed: bool,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.task.state == TaskState::Success
    }

    pub fn is_payload_too_large(&self) -> bool {
        self.error.as_ref().is_some_and(GeobatchError::is_payload_too_large)
    }
}

/// Pool and transfer settings
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub max_workers: usize,
    /// Total attempts per task
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub request_timeout: Duration,
    pub scale_m: f64,
    pub crs: String,
    pub expected_content_type: String,
}

impl DownloadOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            max_retries: settings.max_retries,
            base_retry_delay: settings.base_retry_delay,
            request_timeout: settings.request_timeout,
            scale_m: settings.scale_m,
            crs: settings.crs.code(),
            expected_content_type: settings.expected_content_type.clone(),
        }
    }
}

/// Wait after the `failed_attempts`-th consecutive failure: `base * 2^(n-1)`
pub fn backoff_delay(base: Duration, failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Whether a declared content type names the expected media type
pub fn content_type_matches(declared: Option<&str>, expected: &str) -> bool {
    declared
        .and_then(|ct| ct.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case(expected.trim()))
        .unwrap_or(false)
}
