//! Batch orchestration.
//!
//! One run takes a plot collection to a result table with exactly one row
//! per plot. The local path plans tiles, downloads them through the worker
//! pool, re-plans plots whose tiles were too large, builds a mosaic and
//! extracts statistics in chunks. The remote paths hand chunks of plots to
//! the service. Both end in the same aggregation step.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use geobatch_core::config::EngineSettings;
use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::layers::RasterExpression;
use geobatch_core::models::{
    statistic_columns, ExecutionMode, PartialTable, Plot, Reduction, ResultTable, WorkloadProfile,
};
use geobatch_core::ports::RemoteService;
use geobatch_geo::{profile_plots, validate_plot, GeometryTransform, IdentityTransform};

use crate::aggregate::merge_into_schema;
use crate::download::{download_all, DownloadOptions, TaskResult, TaskState};
use crate::extract::{extract_in_chunks_cancellable, ZonalStatistics};
use crate::mode::suggest_mode_for;
use crate::mosaic::build_mosaic_with_bands;
use crate::planner::TilePlanner;
use crate::remote::reduce_remote;
use crate::tiling::{plan_regions, tasks_for_regions};
use crate::zonal::PixelZonalStatistics;

/// Counts reported at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub invalid_geometries: usize,
    pub failed_tiles: usize,
    pub decoy_tiles: usize,
    pub failed_chunks: usize,
    pub replans: u32,
    pub mosaic_tiles: usize,
}

/// Result table plus the run summary
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub table: ResultTable,
    pub summary: BatchSummary,
}

/// Workload profile of a plot collection and the mode it suggests
pub fn profile_and_suggest(plots: &[Plot], file_size_mb: f64) -> (WorkloadProfile, ExecutionMode) {
    let profile = profile_plots(plots, file_size_mb);
    let mode = suggest_mode_for(&profile);
    (profile, mode)
}

#[derive(Default)]
struct LocalStats {
    failed_tiles: usize,
    decoy_tiles: usize,
    failed_chunks: usize,
    replans: u32,
    mosaic_tiles: usize,
}

/// Runs batches against one remote service with fixed settings
pub struct BatchPipeline {
    service: Arc<dyn RemoteService>,
    zonal: Arc<dyn ZonalStatistics>,
    transform: Arc<dyn GeometryTransform>,
    settings: EngineSettings,
    operations: Vec<Reduction>,
    cancel: CancellationToken,
}

impl BatchPipeline {
    pub fn new(service: Arc<dyn RemoteService>, settings: EngineSettings) -> Self {
        Self {
            service,
            zonal: Arc::new(PixelZonalStatistics::new()),
            transform: Arc::new(IdentityTransform),
            settings,
            operations: vec![Reduction::Sum],
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_zonal(mut self, zonal: Arc<dyn ZonalStatistics>) -> Self {
        self.zonal = zonal;
        self
    }

    /// Transform applied to tile regions before download, e.g. decoys
    pub fn with_transform(mut self, transform: Arc<dyn GeometryTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_operations(mut self, operations: Vec<Reduction>) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run from dispatching further work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one batch in `mode`
    ///
    /// Per-plot failures become missing rows. Structural failures (no
    /// usable tile, duplicate ids, an infeasible tile plan) and
    /// cancellation are returned as errors; tiles already downloaded stay
    /// on disk for the next run.
    pub async fn run(
        &self,
        expression: &RasterExpression,
        plots: &[Plot],
        mode: ExecutionMode,
    ) -> Result<BatchOutcome> {
        if expression.is_empty() {
            return Err(GeobatchError::ConfigInvalid {
                key: "layers".to_string(),
                reason: "no raster layer could be prepared".to_string(),
            });
        }
        if self.operations.is_empty() {
            return Err(GeobatchError::ConfigInvalid {
                key: "operations".to_string(),
                reason: "at least one reduction is required".to_string(),
            });
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            run_id = %run_id,
            mode = mode.as_str(),
            plots = plots.len(),
            bands = expression.band_count(),
            "Starting batch"
        );

        let mut valid = Vec::with_capacity(plots.len());
        let mut invalid_geometries = 0;
        for plot in plots {
            match validate_plot(plot) {
                Ok(()) => valid.push(plot.clone()),
                Err(e) => {
                    tracing::warn!(feature_id = %plot.id, error = %e, "Skipping invalid geometry");
                    invalid_geometries += 1;
                }
            }
        }

        let columns = statistic_columns(&expression.band_names(), &self.operations);
        let (partial, stats) = if mode.is_remote() {
            self.run_remote(expression, &valid, mode).await?
        } else {
            self.run_local(expression, &valid).await?
        };

        let table = merge_into_schema(plots, &partial, &columns)?;

        let summary = BatchSummary {
            run_id,
            mode,
            started_at,
            finished_at: Utc::now(),
            total: plots.len(),
            succeeded: table.complete_count(),
            failed: table.missing_count(),
            invalid_geometries,
            failed_tiles: stats.failed_tiles,
            decoy_tiles: stats.decoy_tiles,
            failed_chunks: stats.failed_chunks,
            replans: stats.replans,
            mosaic_tiles: stats.mosaic_tiles,
        };

        tracing::info!(
            run_id = %run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            invalid_geometries,
            failed_tiles = summary.failed_tiles,
            failed_chunks = summary.failed_chunks,
            "Batch complete"
        );

        Ok(BatchOutcome { table, summary })
    }

    async fn run_remote(
        &self,
        expression: &RasterExpression,
        plots: &[Plot],
        mode: ExecutionMode,
    ) -> Result<(Vec<PartialTable>, LocalStats)> {
        let options = DownloadOptions::from_settings(&self.settings);
        let outcome = reduce_remote(
            self.service.as_ref(),
            expression,
            plots,
            mode,
            self.settings.chunk_size,
            &options,
            &self.cancel,
        )
        .await?;

        if self.cancel.is_cancelled() {
            return Err(GeobatchError::Cancelled);
        }

        let stats = LocalStats {
            failed_chunks: outcome.failed_chunks,
            ..LocalStats::default()
        };
        Ok((outcome.tables, stats))
    }

    async fn run_local(
        &self,
        expression: &RasterExpression,
        plots: &[Plot],
    ) -> Result<(Vec<PartialTable>, LocalStats)> {
        let settings = &self.settings;
        let options = DownloadOptions::from_settings(settings);
        let shared_expression = Arc::new(expression.clone());
        let mut stats = LocalStats::default();

        let band_count = u32::try_from(expression.band_count()).map_err(|_| {
            GeobatchError::ConfigInvalid {
                key: "layers".to_string(),
                reason: "too many bands".to_string(),
            }
        })?;
        let mut planner = TilePlanner::from_settings(band_count, settings);
        let mut pending: Vec<Plot> = plots.to_vec();
        let mut untiled: HashSet<usize> = HashSet::new();
        let mut results: Vec<TaskResult> = Vec::new();

        loop {
            let (regions, owners, failures) = plan_regions(&pending, &planner)?;
            untiled.extend(failures.into_iter().map(|(index, _)| index));

            let regions = self.transform.apply(regions);
            let tasks = tasks_for_regions(&regions, &owners, &settings.tile_dir);
            tracing::info!(
                tasks = tasks.len(),
                plots = pending.len(),
                safety_margin = planner.safety_margin(),
                "Dispatching tile downloads"
            );

            let round = download_all(
                Arc::clone(&self.service),
                Arc::clone(&shared_expression),
                tasks,
                &options,
                &self.cancel,
            )
            .await;

            let too_large: HashSet<usize> = round
                .iter()
                .filter(|r| r.is_payload_too_large())
                .filter_map(|r| r.task.plot_index)
                .collect();
            results.extend(round);

            if self.cancel.is_cancelled() {
                tracing::warn!("Batch cancelled after download stage");
                return Err(GeobatchError::Cancelled);
            }
            if too_large.is_empty() {
                break;
            }
            if stats.replans >= settings.max_replans {
                tracing::warn!(plots = too_large.len(), "Tiles still too large after re-planning");
                break;
            }

            stats.replans += 1;
            planner = planner.with_margin(planner.safety_margin() * 0.5);
            tracing::info!(
                plots = too_large.len(),
                round = stats.replans,
                safety_margin = planner.safety_margin(),
                "Re-planning plots with oversized tiles"
            );

            // Tiles of a re-planned plot are replaced wholesale by the new grid
            let mut kept = Vec::with_capacity(results.len());
            for result in results {
                match result.task.plot_index {
                    Some(index) if too_large.contains(&index) => {
                        if result.is_success() {
                            remove_tile(&result.task.destination).await;
                        }
                    }
                    _ => kept.push(result),
                }
            }
            results = kept;
            pending = plots.iter().filter(|p| too_large.contains(&p.index)).cloned().collect();
        }

        let mut failed_plots = untiled;
        for result in &results {
            if result.task.is_decoy() {
                stats.decoy_tiles += 1;
                continue;
            }
            if result.task.state != TaskState::Success {
                stats.failed_tiles += 1;
                if let Some(index) = result.task.plot_index {
                    failed_plots.insert(index);
                }
            }
        }

        let mosaic = build_mosaic_with_bands(
            &settings.tile_dir,
            &settings.exclude_pattern,
            expression.band_count(),
        )?
        .with_band_names(expression.band_names())?;
        stats.mosaic_tiles = mosaic.tile_count();

        let extractable: Vec<Plot> =
            plots.iter().filter(|p| !failed_plots.contains(&p.index)).cloned().collect();
        tracing::info!(
            plots = extractable.len(),
            failed_plots = failed_plots.len(),
            mosaic_tiles = stats.mosaic_tiles,
            "Extracting statistics"
        );

        let zonal = Arc::clone(&self.zonal);
        let operations = self.operations.clone();
        let chunk_size = settings.chunk_size;
        let workers = settings.max_extract_workers;
        let cancel = self.cancel.clone();
        let extraction = tokio::task::spawn_blocking(move || {
            extract_in_chunks_cancellable(
                zonal.as_ref(),
                &mosaic,
                &extractable,
                chunk_size,
                &operations,
                workers,
                &cancel,
            )
        })
        .await
        .map_err(|e| GeobatchError::Raster {
            path: settings.tile_dir.clone(),
            reason: format!("extraction worker failed: {}", e),
        })??;

        if self.cancel.is_cancelled() {
            return Err(GeobatchError::Cancelled);
        }
        stats.failed_chunks = extraction.failed_chunks;

        if settings.cleanup_files {
            let files: Vec<PathBuf> = results
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.task.destination.clone())
                .collect();
            for file in &files {
                remove_tile(file).await;
            }
            tracing::info!(files = files.len(), "Removed tile files");
        }

        Ok((vec![extraction.table], stats))
    }
}

async fn remove_tile(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove tile");
    }
}
