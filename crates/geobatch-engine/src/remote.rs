//! Server-side reduction path for the sequential and concurrent modes.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::layers::RasterExpression;
use geobatch_core::models::{ExecutionMode, PartialTable, Plot};
use geobatch_core::ports::RemoteService;

use crate::download::{backoff_delay, DownloadOptions};

/// Partial tables from remote reduction, in chunk order
#[derive(Debug, Clone, Default)]
pub struct RemoteOutcome {
    pub tables: Vec<PartialTable>,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub skipped_chunks: usize,
}

enum ChunkOutcome {
    Done(PartialTable),
    Failed,
    Skipped,
}

/// Reduce `plots` on the remote service in chunks of `chunk_size`
///
/// `Sequential` sends one chunk at a time, `Concurrent` up to
/// `options.max_workers`. Each chunk gets the same retry budget as a tile
/// download. Chunks that fail are counted and left out; their plots become
/// missing rows at merge time.
pub async fn reduce_remote<S>(
    service: &S,
    expression: &RasterExpression,
    plots: &[Plot],
    mode: ExecutionMode,
    chunk_size: usize,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<RemoteOutcome>
where
    S: RemoteService + ?Sized,
{
    let concurrency = match mode {
        ExecutionMode::Sequential => 1,
        ExecutionMode::Concurrent => options.max_workers.max(1),
        ExecutionMode::Local => {
            return Err(GeobatchError::ConfigInvalid {
                key: "mode".to_string(),
                reason: "local mode does not use remote reduction".to_string(),
            })
        }
    };

    let outcomes: Vec<ChunkOutcome> = stream::iter(plots.chunks(chunk_size.max(1)).enumerate())
        .map(|(index, chunk)| reduce_chunk(service, expression, index, chunk, options, cancel))
        .buffered(concurrency)
        .collect()
        .await;

    let mut outcome = RemoteOutcome { chunks: outcomes.len(), ..RemoteOutcome::default() };
    for chunk in outcomes {
        match chunk {
            ChunkOutcome::Done(table) => outcome.tables.push(table),
            ChunkOutcome::Failed => outcome.failed_chunks += 1,
            ChunkOutcome::Skipped => outcome.skipped_chunks += 1,
        }
    }

    tracing::info!(
        mode = mode.as_str(),
        chunks = outcome.chunks,
        failed_chunks = outcome.failed_chunks,
        skipped_chunks = outcome.skipped_chunks,
        "Remote reduction complete"
    );
    Ok(outcome)
}

async fn reduce_chunk<S>(
    service: &S,
    expression: &RasterExpression,
    index: usize,
    chunk: &[Plot],
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> ChunkOutcome
where
    S: RemoteService + ?Sized,
{
    let max_attempts = options.max_retries.max(1);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return ChunkOutcome::Skipped;
        }

        let result = tokio::time::timeout(
            options.request_timeout,
            service.reduce_regions(expression, chunk, options.scale_m),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GeobatchError::Timeout { seconds: options.request_timeout.as_secs() })
        });

        match result {
            Ok(table) => {
                tracing::debug!(chunk = index, attempt, rows = table.len(), "Chunk reduced");
                return ChunkOutcome::Done(table);
            }
            Err(e) if !e.is_retryable() || attempt == max_attempts => {
                tracing::warn!(chunk = index, plots = chunk.len(), attempt, error = %e, "Remote chunk failed");
                return ChunkOutcome::Failed;
            }
            Err(e) => {
                tracing::debug!(chunk = index, attempt, error = %e, "Remote chunk attempt failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ChunkOutcome::Skipped,
                    _ = tokio::time::sleep(backoff_delay(options.base_retry_delay, attempt)) => {}
                }
            }
        }
    }
    ChunkOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geobatch_core::models::{FeatureId, Geometry};
    use geobatch_core::ports::{ExportHandle, ExportRequest, RasterPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeReducer {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_first: usize,
        poisoned: Option<FeatureId>,
    }

    impl FakeReducer {
        fn new(fail_first: usize, poisoned: Option<FeatureId>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_first,
                poisoned,
            }
        }
    }

    #[async_trait]
    impl RemoteService for FakeReducer {
        async fn request_export(&self, _request: &ExportRequest) -> Result<ExportHandle> {
            unreachable!("reduction tests never export")
        }

        async fn fetch(&self, _handle: &ExportHandle) -> Result<RasterPayload> {
            unreachable!("reduction tests never fetch")
        }

        async fn reduce_regions(
            &self,
            _expression: &RasterExpression,
            plots: &[Plot],
            _scale_m: f64,
        ) -> Result<PartialTable> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call < self.fail_first {
                return Err(GeobatchError::Service { status: Some(503), message: "busy".into() });
            }
            if plots.iter().any(|p| Some(&p.id) == self.poisoned.as_ref()) {
                return Err(GeobatchError::Service { status: Some(400), message: "bad region".into() });
            }
            let mut table = PartialTable::new(vec!["b1_sum".to_string()]);
            for plot in plots {
                table.push(plot.id.clone(), vec![plot.index as f64]);
            }
            Ok(table)
        }
    }

    fn plots(n: usize) -> Vec<Plot> {
        (0..n).map(|i| Plot::new(i as i64, i, Geometry::point(0.0, 0.0))).collect()
    }

    fn options(max_workers: usize) -> DownloadOptions {
        DownloadOptions {
            max_workers,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            scale_m: 10.0,
            crs: "EPSG:4326".to_string(),
            expected_content_type: "image/tiff".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sequential_one_chunk_at_a_time() {
        let service = FakeReducer::new(0, None);
        let outcome = reduce_remote(
            &service,
            &RasterExpression::default(),
            &plots(10),
            ExecutionMode::Sequential,
            3,
            &options(8),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.chunks, 4);
        assert_eq!(outcome.tables.len(), 4);
        assert_eq!(service.peak.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.tables[3].rows[0].feature_id, FeatureId::Int(9));
    }

    #[tokio::test]
    async fn test_concurrent_bounded_by_workers() {
        let service = FakeReducer::new(0, None);
        let outcome = reduce_remote(
            &service,
            &RasterExpression::default(),
            &plots(40),
            ExecutionMode::Concurrent,
            2,
            &options(4),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.tables.len(), 20);
        assert!(service.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_and_permanent_ones_counted() {
        let service = FakeReducer::new(2, Some(FeatureId::Int(4)));
        let outcome = reduce_remote(
            &service,
            &RasterExpression::default(),
            &plots(6),
            ExecutionMode::Sequential,
            3,
            &options(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.tables.len(), 1);
        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_chunks_skipped() {
        let service = FakeReducer::new(0, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = reduce_remote(
            &service,
            &RasterExpression::default(),
            &plots(6),
            ExecutionMode::Concurrent,
            2,
            &options(2),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.skipped_chunks, 3);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_mode_rejected() {
        let service = FakeReducer::new(0, None);
        let result = reduce_remote(
            &service,
            &RasterExpression::default(),
            &plots(1),
            ExecutionMode::Local,
            1,
            &options(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }
}
