//! Per-plot tile layout.
//!
//! The plot is the tiling unit: each plot's bounding box is cut into a grid
//! of planner-sized tiles, and a plot that fits in one tile gets exactly one.
//! File stems derive from the plot's ingestion index, so every tile of a
//! batch has its own file.

use std::collections::HashMap;
use std::path::Path;

use geo::{Intersects, Rect};

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::{Bounds, Plot};
use geobatch_geo::{GeometryExt, TileRegion};

use crate::download::DownloadTask;
use crate::planner::{TilePlanner, METERS_PER_DEGREE, MIN_COS_LATITUDE};

/// File stem of a plot's tile; `cell` is `(row, col)` for gridded plots
pub fn tile_file_stem(plot: &Plot, cell: Option<(usize, usize)>) -> String {
    let base = format!("plot_{:06}_{}", plot.index, plot.id.file_stem());
    match cell {
        Some((row, col)) => format!("{}_r{}_c{}", base, row, col),
        None => base,
    }
}

/// Tile regions covering one plot
pub fn plot_regions(plot: &Plot, planner: &TilePlanner) -> Result<Vec<TileRegion>> {
    let bounds = plot.geometry.bounds().ok_or_else(|| GeobatchError::InvalidGeometry {
        feature_id: plot.id.to_string(),
        reason: "geometry has no coordinates".to_string(),
    })?;

    // Sub-pixel extents (points, thin lines) are padded by one pixel
    let pixel_height = planner.scale_m() / METERS_PER_DEGREE;
    let pixel_width =
        pixel_height / bounds.min_abs_latitude().to_radians().cos().max(MIN_COS_LATITUDE);
    let bounds = bounds.expand(
        if bounds.width() < pixel_width { pixel_width } else { 0.0 },
        if bounds.height() < pixel_height { pixel_height } else { 0.0 },
    );

    let plan = planner.plan_for_bounds(&bounds)?;
    let cols = (bounds.width() / plan.width_deg).ceil().max(1.0) as usize;
    let rows = (bounds.height() / plan.height_deg).ceil().max(1.0) as usize;

    if rows == 1 && cols == 1 {
        return Ok(vec![TileRegion::real(tile_file_stem(plot, None), bounds)]);
    }

    let shape = plot.geometry.to_geo();
    let mut regions = Vec::new();
    for row in 0..rows {
        let max_y = bounds.max_y - row as f64 * plan.height_deg;
        let min_y = (max_y - plan.height_deg).max(bounds.min_y);
        for col in 0..cols {
            let min_x = bounds.min_x + col as f64 * plan.width_deg;
            let max_x = (min_x + plan.width_deg).min(bounds.max_x);
            let cell = Bounds::new(min_x, min_y, max_x, max_y);

            let rect = Rect::new(
                geo::coord! { x: cell.min_x, y: cell.min_y },
                geo::coord! { x: cell.max_x, y: cell.max_y },
            );
            if !shape.intersects(&rect) {
                continue;
            }
            regions.push(TileRegion::real(tile_file_stem(plot, Some((row, col))), cell));
        }
    }

    tracing::debug!(
        feature_id = %plot.id,
        rows,
        cols,
        tiles = regions.len(),
        "Split plot into tile grid"
    );
    Ok(regions)
}

/// Regions for every plot, with the plot index each region belongs to
///
/// Plots whose geometry cannot be tiled are returned as failures; an
/// infeasible tile plan is batch-wide and aborts.
pub fn plan_regions(
    plots: &[Plot],
    planner: &TilePlanner,
) -> Result<(Vec<TileRegion>, HashMap<String, usize>, Vec<(usize, GeobatchError)>)> {
    let mut regions = Vec::new();
    let mut owners = HashMap::new();
    let mut failures = Vec::new();

    for plot in plots {
        match plot_regions(plot, planner) {
            Ok(plot_regions) => {
                for region in plot_regions {
                    owners.insert(region.file_stem.clone(), plot.index);
                    regions.push(region);
                }
            }
            Err(e @ GeobatchError::TilePlanInfeasible { .. }) => return Err(e),
            Err(e @ GeobatchError::ConfigInvalid { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(feature_id = %plot.id, error = %e, "Plot cannot be tiled");
                failures.push((plot.index, e));
            }
        }
    }

    Ok((regions, owners, failures))
}

/// Download tasks for transformed regions; unknown stems are decoys
pub fn tasks_for_regions(
    regions: &[TileRegion],
    owners: &HashMap<String, usize>,
    tile_dir: &Path,
) -> Vec<DownloadTask> {
    regions
        .iter()
        .map(|region| {
            let owner = if region.decoy { None } else { owners.get(&region.file_stem).copied() };
            DownloadTask::new(region, tile_dir, owner)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geobatch_core::models::Geometry;

    const LIMIT: u64 = 50_331_648;

    fn planner() -> TilePlanner {
        // 100 bands at 10 m: about 0.0155 degrees per side
        TilePlanner::new(100, 10.0, LIMIT, 4, 0.95)
    }

    #[test]
    fn test_file_stem() {
        let plot = Plot::new("farm a/1", 12, Geometry::point(0.0, 0.0));
        assert_eq!(tile_file_stem(&plot, None), "plot_000012_farm_a_1");
        assert_eq!(tile_file_stem(&plot, Some((1, 2))), "plot_000012_farm_a_1_r1_c2");
    }

    #[test]
    fn test_point_padded_to_single_tile() {
        let plot = Plot::new(1, 0, Geometry::point(10.0, 0.5));
        let regions = plot_regions(&plot, &planner()).unwrap();

        assert_eq!(regions.len(), 1);
        let bounds = regions[0].bounds;
        assert!(bounds.contains_point(10.0, 0.5));
        assert!(bounds.width() > 0.0 && bounds.height() > 0.0);
        assert_eq!(regions[0].file_stem, "plot_000000_1");
    }

    #[test]
    fn test_large_polygon_split_into_grid() {
        let planner = planner();
        let plan = planner.plan_for_latitude(0.0).unwrap();
        let bounds = Bounds::new(0.0, 0.0, plan.width_deg * 2.5, plan.height_deg * 1.5);
        let plot = Plot::new(7, 3, Geometry::rectangle(&bounds));

        let regions = plot_regions(&plot, &planner).unwrap();
        assert_eq!(regions.len(), 6);
        assert!(regions.iter().all(|r| r.file_stem.starts_with("plot_000003_7_r")));

        let covered = regions.iter().skip(1).fold(regions[0].bounds, |acc, r| acc.union(&r.bounds));
        assert!((covered.width() - bounds.width()).abs() < 1e-9);
        assert!((covered.height() - bounds.height()).abs() < 1e-9);
    }

    #[test]
    fn test_grid_skips_cells_outside_geometry() {
        let planner = planner();
        let plan = planner.plan_for_latitude(0.0).unwrap();
        let (w, h) = (plan.width_deg, plan.height_deg);
        // Two small squares in opposite corners of a 3 x 3 tile grid
        let geometry = Geometry::MultiPolygon {
            coordinates: vec![
                vec![vec![[0.0, 0.0], [0.1 * w, 0.0], [0.1 * w, 0.1 * h], [0.0, 0.0]]],
                vec![vec![
                    [2.9 * w, 2.9 * h],
                    [2.95 * w, 2.9 * h],
                    [2.95 * w, 2.95 * h],
                    [2.9 * w, 2.9 * h],
                ]],
            ],
        };
        let plot = Plot::new(1, 0, geometry);

        let regions = plot_regions(&plot, &planner).unwrap();
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn test_plan_regions_isolates_bad_plots() {
        let plots = vec![
            Plot::new(1, 0, Geometry::point(0.0, 0.0)),
            Plot::new(2, 1, Geometry::MultiPolygon { coordinates: vec![] }),
        ];
        let (regions, owners, failures) = plan_regions(&plots, &planner()).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(owners.get("plot_000000_1"), Some(&0));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 1);
    }

    #[test]
    fn test_plan_regions_aborts_on_infeasible_plan() {
        let planner = TilePlanner::new(10_000, 10.0, 1_000, 4, 0.95);
        let plots = vec![Plot::new(1, 0, Geometry::point(0.0, 0.0))];
        assert!(matches!(
            plan_regions(&plots, &planner),
            Err(GeobatchError::TilePlanInfeasible { .. })
        ));
    }

    #[test]
    fn test_tasks_link_back_to_plots() {
        let plots = vec![Plot::new(5, 4, Geometry::point(1.0, 1.0))];
        let (mut regions, owners, _) = plan_regions(&plots, &planner()).unwrap();
        regions.push(TileRegion {
            file_stem: "decoy_000000".to_string(),
            bounds: Bounds::new(3.0, 3.0, 3.1, 3.1),
            decoy: true,
        });

        let tasks = tasks_for_regions(&regions, &owners, Path::new("tiles"));
        assert_eq!(tasks[0].plot_index, Some(4));
        assert!(tasks[1].is_decoy());
        assert_eq!(tasks[1].file_name(), "decoy_000000.tif");
    }
}
