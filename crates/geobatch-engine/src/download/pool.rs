//! Bounded-concurrency tile downloads with retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::layers::RasterExpression;
use geobatch_core::ports::remote::GEOTIFF_FORMAT;
use geobatch_core::ports::{ExportRequest, RemoteService};

use super::{backoff_delay, content_type_matches, DownloadOptions, DownloadTask, TaskResult, TaskState};
use crate::raster::{probe_geotiff, read_header};

/// Download every task, at most `options.max_workers` transfers at a time
///
/// A tile already on disk is kept when its header reads and its band count
/// matches `expression`; anything else is downloaded again. Resume checks
/// hold a worker permit like transfers do. Failed tasks end up `Failed` with
/// their last error; they never abort the batch. Once `cancel` fires no new attempt starts, while attempts already
/// in flight run to completion or to their own timeout. Results are sorted
/// by destination path.
pub async fn download_all<S>(
    service: Arc<S>,
    expression: Arc<RasterExpression>,
    tasks: Vec<DownloadTask>,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Vec<TaskResult>
where
    S: RemoteService + ?Sized + 'static,
{
    let total = tasks.len();
    let permits = Arc::new(Semaphore::new(options.max_workers.max(1)));
    let mut downloads = JoinSet::new();

    for task in tasks {
        let service = Arc::clone(&service);
        let expression = Arc::clone(&expression);
        let permits = Arc::clone(&permits);
        let options = options.clone();
        let token = cancel.clone();
        let fallback = task.clone();

        downloads.spawn(async move {
            let worker = download_task(task, service, expression, permits, &options, &token);
            match AssertUnwindSafe(worker).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    let mut task = fallback;
                    task.state = TaskState::Failed;
                    TaskResult {
                        task,
                        error: Some(GeobatchError::Service {
                            status: None,
                            message: "download worker panicked".to_string(),
                        }),
                        resumed: false,
                    }
                }
            }
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = downloads.join_next().await {
        match joined {
            Ok(result) => {
                if let (TaskState::Failed, Some(error)) = (result.task.state, &result.error) {
                    warn!(
                        file = %result.task.file_name(),
                        attempts = result.task.attempts,
                        error = %error,
                        "Tile download failed"
                    );
                }
                results.push(result);
            }
            Err(join_err) => warn!(error = %join_err, "Download task aborted"),
        }
    }

    results.sort_by(|a, b| a.task.destination.cmp(&b.task.destination));

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.iter().filter(|r| r.task.state == TaskState::Failed).count();
    let resumed = results.iter().filter(|r| r.resumed).count();
    info!(
        total,
        succeeded,
        failed,
        resumed,
        cancelled = cancel.is_cancelled(),
        "Download stage complete"
    );

    results
}

async fn download_task<S>(
    mut task: DownloadTask,
    service: Arc<S>,
    expression: Arc<RasterExpression>,
    permits: Arc<Semaphore>,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> TaskResult
where
    S: RemoteService + ?Sized,
{
    let band_count = expression.band_count();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(task, None),
        permit = Arc::clone(&permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return cancelled(task, None),
        },
    };
    let resumable = existing_tile_is_valid(&task, band_count).await;
    drop(permit);
    if resumable {
        debug!(file = %task.file_name(), "Tile already on disk");
        task.state = TaskState::Success;
        return TaskResult { task, error: None, resumed: true };
    }

    let request = ExportRequest {
        expression: (*expression).clone(),
        region: task.region.clone(),
        scale_m: options.scale_m,
        crs: options.crs.clone(),
        format: GEOTIFF_FORMAT.to_string(),
    };

    let max_attempts = options.max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(task, last_error),
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return cancelled(task, last_error),
            },
        };

        task.attempts = attempt;
        let outcome = tokio::time::timeout(
            options.request_timeout,
            fetch_tile(service.as_ref(), &request, &task, band_count, options),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GeobatchError::Timeout { seconds: options.request_timeout.as_secs() })
        });
        drop(permit);

        match outcome {
            Ok(()) => {
                debug!(file = %task.file_name(), attempt, "Tile downloaded");
                task.state = TaskState::Success;
                return TaskResult { task, error: None, resumed: false };
            }
            Err(e) if !e.is_retryable() => {
                debug!(file = %task.file_name(), attempt, error = %e, "Tile failed permanently");
                task.state = TaskState::Failed;
                return TaskResult { task, error: Some(e), resumed: false };
            }
            Err(e) => {
                debug!(file = %task.file_name(), attempt, error = %e, "Tile attempt failed");
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            let delay = backoff_delay(options.base_retry_delay, attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(task, last_error),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    task.state = TaskState::Failed;
    TaskResult { task, error: last_error, resumed: false }
}

fn cancelled(task: DownloadTask, last_error: Option<GeobatchError>) -> TaskResult {
    TaskResult { task, error: Some(last_error.unwrap_or(GeobatchError::Cancelled)), resumed: false }
}

async fn existing_tile_is_valid(task: &DownloadTask, band_count: usize) -> bool {
    if !tokio::fs::try_exists(&task.destination).await.unwrap_or(false) {
        return false;
    }
    let path = task.destination.clone();
    match tokio::task::spawn_blocking(move || read_header(&path)).await {
        Ok(Ok(header)) if header.band_count == band_count => true,
        Ok(Ok(header)) => {
            warn!(
                file = %task.file_name(),
                bands = header.band_count,
                expected = band_count,
                "Replacing tile from a different layer set"
            );
            false
        }
        Ok(Err(e)) => {
            warn!(file = %task.file_name(), error = %e, "Replacing unreadable tile");
            false
        }
        Err(_) => false,
    }
}

/// One attempt: export, transfer, validate, persist
async fn fetch_tile<S>(
    service: &S,
    request: &ExportRequest,
    task: &DownloadTask,
    band_count: usize,
    options: &DownloadOptions,
) -> Result<()>
where
    S: RemoteService + ?Sized,
{
    let handle = service.request_export(request).await?;
    let payload = service.fetch(&handle).await?;

    if !payload.is_success() {
        return Err(GeobatchError::Service {
            status: Some(payload.status),
            message: String::from_utf8_lossy(&payload.bytes).chars().take(200).collect(),
        });
    }
    if !content_type_matches(payload.content_type.as_deref(), &options.expected_content_type) {
        return Err(GeobatchError::InvalidPayload {
            reason: format!(
                "expected content type {}, got {}",
                options.expected_content_type,
                payload.content_type.as_deref().unwrap_or("none")
            ),
        });
    }
    let header = probe_geotiff(&payload.bytes)?;
    if header.band_count != band_count {
        return Err(GeobatchError::InvalidPayload {
            reason: format!("expected {} bands, got {}", band_count, header.band_count),
        });
    }

    if let Some(parent) = task.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = task.partial_path();
    tokio::fs::write(&partial, &payload.bytes).await?;
    tokio::fs::rename(&partial, &task.destination).await?;
    Ok(())
}
