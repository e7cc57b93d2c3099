//! Parallel zonal extraction over a mosaic.

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::{statistic_columns, PartialTable, Plot, Reduction};

use crate::mosaic::Mosaic;

/// Port for the local zonal-statistics routine
///
/// Returns at most one row per plot with one value per (band, operation)
/// pair, in the column order of [`statistic_columns`]. Plots it cannot
/// reduce are simply absent.
pub trait ZonalStatistics: Send + Sync {
    fn reduce(
        &self,
        mosaic: &Mosaic,
        plots: &[Plot],
        operations: &[Reduction],
    ) -> Result<PartialTable>;
}

/// Concatenated chunk tables plus chunk bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub table: PartialTable,
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Chunks never started because the run was cancelled
    pub skipped_chunks: usize,
}

/// Reduce `plots` in chunks of `chunk_size` on up to `max_workers` threads
pub fn extract_in_chunks<Z>(
    zonal: &Z,
    mosaic: &Mosaic,
    plots: &[Plot],
    chunk_size: usize,
    operations: &[Reduction],
    max_workers: usize,
) -> Result<ExtractionOutcome>
where
    Z: ZonalStatistics + ?Sized,
{
    extract_in_chunks_cancellable(
        zonal,
        mosaic,
        plots,
        chunk_size,
        operations,
        max_workers,
        &CancellationToken::new(),
    )
}

enum ChunkOutcome {
    Done(PartialTable),
    Failed,
    Skipped,
}

/// [`extract_in_chunks`] that stops starting chunks once `cancel` fires
///
/// A failed chunk is logged and contributes no rows. Tables are concatenated
/// in chunk order.
pub fn extract_in_chunks_cancellable<Z>(
    zonal: &Z,
    mosaic: &Mosaic,
    plots: &[Plot],
    chunk_size: usize,
    operations: &[Reduction],
    max_workers: usize,
    cancel: &CancellationToken,
) -> Result<ExtractionOutcome>
where
    Z: ZonalStatistics + ?Sized,
{
    let columns = statistic_columns(mosaic.band_names(), operations);
    if plots.is_empty() {
        return Ok(ExtractionOutcome {
            table: PartialTable::new(columns),
            chunks: 0,
            failed_chunks: 0,
            skipped_chunks: 0,
        });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .thread_name(|i| format!("geobatch-extract-{}", i))
        .build()
        .map_err(|e| GeobatchError::ConfigInvalid {
            key: "max_extract_workers".to_string(),
            reason: format!("Failed to start extraction pool: {}", e),
        })?;

    let outcomes: Vec<ChunkOutcome> = pool.install(|| {
        plots
            .par_chunks(chunk_size.max(1))
            .enumerate()
            .map(|(index, chunk)| {
                if cancel.is_cancelled() {
                    return ChunkOutcome::Skipped;
                }
                match zonal.reduce(mosaic, chunk, operations) {
                    Ok(table) if table.columns == columns || table.is_empty() => {
                        tracing::debug!(chunk = index, rows = table.len(), "Chunk extracted");
                        ChunkOutcome::Done(table)
                    }
                    Ok(table) => {
                        tracing::warn!(
                            chunk = index,
                            expected = ?columns,
                            got = ?table.columns,
                            "Chunk returned unexpected columns"
                        );
                        ChunkOutcome::Failed
                    }
                    Err(e) => {
                        tracing::warn!(chunk = index, plots = chunk.len(), error = %e, "Chunk extraction failed");
                        ChunkOutcome::Failed
                    }
                }
            })
            .collect()
    });

    let chunks = outcomes.len();
    let mut failed_chunks = 0;
    let mut skipped_chunks = 0;
    let mut tables = vec![PartialTable::new(columns)];
    for outcome in outcomes {
        match outcome {
            ChunkOutcome::Done(table) => tables.push(table),
            ChunkOutcome::Failed => failed_chunks += 1,
            ChunkOutcome::Skipped => skipped_chunks += 1,
        }
    }
    let table = PartialTable::concat(tables)?;

    tracing::info!(
        chunks,
        failed_chunks,
        skipped_chunks,
        rows = table.len(),
        "Extraction complete"
    );

    Ok(ExtractionOutcome { table, chunks, failed_chunks, skipped_chunks })
}
