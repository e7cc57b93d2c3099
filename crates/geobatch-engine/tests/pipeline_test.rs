//! Integration tests for the batch pipeline
//!
//! A fake remote service renders GeoTIFF tiles for whatever region it is
//! asked for, so the whole local path runs without a network.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use geobatch_core::config::EngineSettings;
use geobatch_core::layers::{Layer, RasterExpression};
use geobatch_core::models::{Bounds, ExecutionMode, FeatureId, Geometry, PartialTable, Plot};
use geobatch_core::ports::{ExportHandle, ExportRequest, RasterPayload, RemoteService};
use geobatch_core::{GeobatchError, Result};
use geobatch_engine::{encode_geotiff, BatchPipeline, RasterTile};
use geobatch_geo::DecoyTransform;

const TILE_VALUE: f32 = 2.0;

#[derive(Default)]
struct FakeService {
    /// Regions containing this point always answer HTTP 500
    broken_point: Option<[f64; 2]>,
    /// Regions wider than this are rejected as too large
    max_width_deg: Option<f64>,
    exports: AtomicUsize,
    broken_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    reductions: Mutex<Vec<usize>>,
}

/// Encodes the region and the requested band count into the handle
fn handle_for(bounds: &Bounds, bands: usize) -> ExportHandle {
    ExportHandle {
        url: format!("mem://{},{},{},{},{}", bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y, bands),
    }
}

fn parse_handle(handle: &ExportHandle) -> (Bounds, usize) {
    let parts: Vec<f64> = handle
        .url
        .trim_start_matches("mem://")
        .split(',')
        .map(|p| p.parse().unwrap())
        .collect();
    (Bounds::new(parts[0], parts[1], parts[2], parts[3]), parts[4] as usize)
}

#[async_trait]
impl RemoteService for FakeService {
    async fn request_export(&self, request: &ExportRequest) -> Result<ExportHandle> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let bounds = request.region.bounds().unwrap();
        if let Some(max) = self.max_width_deg {
            if bounds.width() > max {
                return Err(GeobatchError::PayloadTooLarge { requested: 60_000_000, limit: 50_331_648 });
            }
        }
        Ok(handle_for(&bounds, request.expression.band_count()))
    }

    async fn fetch(&self, handle: &ExportHandle) -> Result<RasterPayload> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (bounds, bands) = parse_handle(handle);
        if let Some([x, y]) = self.broken_point {
            if bounds.contains_point(x, y) {
                self.broken_fetches.fetch_add(1, Ordering::SeqCst);
                return Ok(RasterPayload {
                    status: 500,
                    content_type: Some("text/plain".to_string()),
                    bytes: b"internal error".to_vec(),
                });
            }
        }

        let tile = RasterTile::filled(&bounds, 4, 4, &vec![TILE_VALUE; bands]);
        Ok(RasterPayload {
            status: 200,
            content_type: Some("image/tiff".to_string()),
            bytes: encode_geotiff(&tile)?,
        })
    }

    async fn reduce_regions(
        &self,
        _expression: &RasterExpression,
        plots: &[Plot],
        _scale_m: f64,
    ) -> Result<PartialTable> {
        self.reductions.lock().unwrap().push(plots.len());
        let mut table = PartialTable::new(vec!["forest_sum".to_string()]);
        for plot in plots {
            table.push(plot.id.clone(), vec![plot.index as f64]);
        }
        Ok(table)
    }
}

fn expression() -> RasterExpression {
    RasterExpression {
        layers: vec![Layer {
            name: "forest".to_string(),
            bands: vec!["forest".to_string()],
            params: serde_json::Value::Null,
        }],
    }
}

fn two_band_expression() -> RasterExpression {
    RasterExpression {
        layers: vec![Layer {
            name: "landcover".to_string(),
            bands: vec!["forest".to_string(), "cocoa".to_string()],
            params: serde_json::Value::Null,
        }],
    }
}

fn plot_location(i: usize) -> [f64; 2] {
    [i as f64 * 0.1 + 0.05, 0.05]
}

fn point_plots(n: usize) -> Vec<Plot> {
    (0..n)
        .map(|i| {
            let [x, y] = plot_location(i);
            Plot::new(i as i64, i, Geometry::point(x, y))
        })
        .collect()
}

fn settings(tile_dir: &Path) -> EngineSettings {
    EngineSettings {
        max_workers: 4,
        max_extract_workers: 2,
        chunk_size: 3,
        max_retries: 3,
        base_retry_delay: Duration::from_millis(1),
        request_timeout: Duration::from_secs(5),
        tile_dir: tile_dir.to_path_buf(),
        ..EngineSettings::default()
    }
}

fn tif_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tif"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_one_failing_tile_gives_one_missing_row() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService { broken_point: Some(plot_location(7)), ..Default::default() });
    let pipeline = BatchPipeline::new(service.clone(), settings(dir.path()));

    let outcome = pipeline.run(&expression(), &point_plots(10), ExecutionMode::Local).await.unwrap();

    let table = &outcome.table;
    assert_eq!(table.len(), 10);
    assert_eq!(table.columns, vec!["forest_sum"]);
    for i in 0..10 {
        let value = table.value(&FeatureId::Int(i), "forest_sum").unwrap();
        if i == 7 {
            assert!(value.is_nan());
            assert!(table.row(&FeatureId::Int(i)).unwrap().missing);
        } else {
            assert_eq!(value, TILE_VALUE as f64);
        }
    }

    assert_eq!(outcome.summary.total, 10);
    assert_eq!(outcome.summary.succeeded, 9);
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(outcome.summary.failed_tiles, 1);
    assert_eq!(outcome.summary.mosaic_tiles, 9);
    assert!(service.peak.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_failing_tile_stops_after_max_retries() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService { broken_point: Some(plot_location(7)), ..Default::default() });
    let pipeline = BatchPipeline::new(service.clone(), settings(dir.path()));

    pipeline.run(&expression(), &point_plots(10), ExecutionMode::Local).await.unwrap();

    assert_eq!(service.broken_fetches.load(Ordering::SeqCst), 3);
    assert_eq!(service.exports.load(Ordering::SeqCst), 9 + 3);
    assert!(!tif_files(dir.path()).iter().any(|n| n.starts_with("plot_000007")));
}

#[tokio::test]
async fn test_second_run_resumes_from_disk() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(FakeService { broken_point: Some(plot_location(7)), ..Default::default() });
    BatchPipeline::new(first, settings(dir.path()))
        .run(&expression(), &point_plots(10), ExecutionMode::Local)
        .await
        .unwrap();

    let second = Arc::new(FakeService::default());
    let outcome = BatchPipeline::new(second.clone(), settings(dir.path()))
        .run(&expression(), &point_plots(10), ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(second.exports.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.summary.succeeded, 10);
    assert_eq!(outcome.table.missing_count(), 0);
}

#[tokio::test]
async fn test_changed_layers_replace_leftover_tiles() {
    let dir = TempDir::new().unwrap();
    BatchPipeline::new(Arc::new(FakeService::default()), settings(dir.path()))
        .run(&expression(), &point_plots(10), ExecutionMode::Local)
        .await
        .unwrap();

    let second = Arc::new(FakeService::default());
    let outcome = BatchPipeline::new(second.clone(), settings(dir.path()))
        .run(&two_band_expression(), &point_plots(10), ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(second.exports.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.summary.succeeded, 10);
    assert_eq!(outcome.table.columns, vec!["forest_sum", "cocoa_sum"]);
    assert_eq!(outcome.table.missing_count(), 0);
    for i in 0..10 {
        assert_eq!(outcome.table.value(&FeatureId::Int(i), "cocoa_sum"), Some(TILE_VALUE as f64));
    }
}

#[tokio::test]
async fn test_failed_redownload_keeps_stale_tile_out_of_mosaic() {
    let dir = TempDir::new().unwrap();
    BatchPipeline::new(Arc::new(FakeService::default()), settings(dir.path()))
        .run(&expression(), &point_plots(10), ExecutionMode::Local)
        .await
        .unwrap();

    let broken = Arc::new(FakeService { broken_point: Some(plot_location(3)), ..Default::default() });
    let result = BatchPipeline::new(broken, settings(dir.path()))
        .run(&two_band_expression(), &point_plots(10), ExecutionMode::Local)
        .await;

    // The one-band tile is still on disk but cannot serve a two-band run
    assert!(matches!(result, Err(GeobatchError::MosaicEmpty { .. })));
    assert_eq!(tif_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_oversized_tiles_are_replanned() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(dir.path());
    // One band: about 0.0087 degrees per tile side, 0.0061 after halving the margin
    settings.byte_limit = 40_000;
    let service = Arc::new(FakeService { max_width_deg: Some(0.007), ..Default::default() });
    let plots = vec![Plot::new(1, 0, Geometry::rectangle(&Bounds::new(0.0, 0.0, 0.012, 0.012)))];

    let outcome = BatchPipeline::new(service, settings)
        .run(&expression(), &plots, ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(outcome.summary.replans, 1);
    assert_eq!(outcome.summary.failed_tiles, 0);
    assert_eq!(outcome.table.missing_count(), 0);
    assert_eq!(tif_files(dir.path()).len(), 4);
}

#[tokio::test]
async fn test_decoys_downloaded_but_kept_out_of_mosaic() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService::default());
    let pipeline = BatchPipeline::new(service.clone(), settings(dir.path()))
        .with_transform(Arc::new(DecoyTransform::new(2, 1.0, 5.0, 42)));

    let outcome = pipeline.run(&expression(), &point_plots(5), ExecutionMode::Local).await.unwrap();

    assert_eq!(service.exports.load(Ordering::SeqCst), 15);
    assert_eq!(outcome.summary.decoy_tiles, 10);
    assert_eq!(outcome.summary.mosaic_tiles, 5);
    assert_eq!(outcome.table.missing_count(), 0);
    let decoys = tif_files(dir.path()).iter().filter(|n| n.starts_with("decoy_")).count();
    assert_eq!(decoys, 10);
}

#[tokio::test]
async fn test_cleanup_removes_tiles() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(dir.path());
    settings.cleanup_files = true;

    let outcome = BatchPipeline::new(Arc::new(FakeService::default()), settings)
        .run(&expression(), &point_plots(3), ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(outcome.table.complete_count(), 3);
    assert!(tif_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_invalid_geometry_is_isolated() {
    let dir = TempDir::new().unwrap();
    let mut plots = point_plots(3);
    plots.push(Plot::new(3, 3, Geometry::point(f64::NAN, 0.0)));

    let outcome = BatchPipeline::new(Arc::new(FakeService::default()), settings(dir.path()))
        .run(&expression(), &plots, ExecutionMode::Local)
        .await
        .unwrap();

    assert_eq!(outcome.table.len(), 4);
    assert_eq!(outcome.summary.invalid_geometries, 1);
    assert!(outcome.table.row(&FeatureId::Int(3)).unwrap().missing);
}

#[tokio::test]
async fn test_all_tiles_failing_is_fatal() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService { broken_point: Some(plot_location(0)), ..Default::default() });

    let result = BatchPipeline::new(service, settings(dir.path()))
        .run(&expression(), &point_plots(1), ExecutionMode::Local)
        .await;

    assert!(matches!(result, Err(GeobatchError::MosaicEmpty { .. })));
}

#[tokio::test]
async fn test_cancelled_run_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService::default());
    let pipeline = BatchPipeline::new(service.clone(), settings(dir.path()));
    pipeline.cancellation_token().cancel();

    let result = pipeline.run(&expression(), &point_plots(4), ExecutionMode::Local).await;

    assert!(matches!(result, Err(GeobatchError::Cancelled)));
    assert_eq!(service.exports.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remote_concurrent_path() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(FakeService::default());

    let outcome = BatchPipeline::new(service.clone(), settings(dir.path()))
        .run(&expression(), &point_plots(10), ExecutionMode::Concurrent)
        .await
        .unwrap();

    assert_eq!(outcome.table.len(), 10);
    assert_eq!(outcome.table.value(&FeatureId::Int(8), "forest_sum"), Some(8.0));
    assert_eq!(outcome.summary.mode, ExecutionMode::Concurrent);
    let mut chunks = service.reductions.lock().unwrap().clone();
    chunks.sort();
    assert_eq!(chunks, vec![1, 3, 3, 3]);
    assert!(tif_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_empty_expression_rejected() {
    let dir = TempDir::new().unwrap();
    let result = BatchPipeline::new(Arc::new(FakeService::default()), settings(dir.path()))
        .run(&RasterExpression::default(), &point_plots(1), ExecutionMode::Local)
        .await;
    assert!(matches!(result, Err(GeobatchError::ConfigInvalid { .. })));
}
