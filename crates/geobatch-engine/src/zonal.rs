//! Pixel-based zonal statistics over mosaic tiles.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use geo::Contains;

use geobatch_core::error::Result;
use geobatch_core::models::{statistic_columns, Bounds, PartialTable, Plot, Reduction};
use geobatch_geo::{to_geo_geometry, GeometryExt};

use crate::extract::ZonalStatistics;
use crate::mosaic::{Mosaic, MosaicTile};
use crate::raster::{read_geotiff, RasterTile};

/// Running sum, count, min and max of one band
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self { count: 0, sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY }
    }
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Result of one reduction; NaN when no valid pixel was seen, except count
    fn finish(&self, op: Reduction) -> f64 {
        if self.count == 0 {
            return match op {
                Reduction::Count => 0.0,
                _ => f64::NAN,
            };
        }
        match op {
            Reduction::Sum => self.sum,
            Reduction::Mean => self.sum / self.count as f64,
            Reduction::Min => self.min,
            Reduction::Max => self.max,
            Reduction::Count => self.count as f64,
        }
    }
}

enum Footprint {
    Area(geo::Geometry),
    Positions(Vec<[f64; 2]>),
}

/// Zonal statistics computed directly from the tile files
///
/// A polygon covers every pixel whose centre lies inside it; point and line
/// geometries cover the pixels containing their vertices. A polygon smaller
/// than a pixel falls back to the pixel under its centroid. Each mosaic cell
/// counts once per plot even where tiles overlap.
///
/// Decoded tiles live only for one `reduce` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelZonalStatistics;

/// Tiles decoded during one chunk, keyed by path
type LoadedTiles = HashMap<PathBuf, Arc<RasterTile>>;

impl PixelZonalStatistics {
    pub fn new() -> Self {
        Self
    }

    fn load(loaded: &mut LoadedTiles, tile: &MosaicTile) -> Result<Arc<RasterTile>> {
        if let Some(raster) = loaded.get(&tile.path) {
            return Ok(Arc::clone(raster));
        }
        let raster = Arc::new(read_geotiff(&tile.path)?);
        loaded.insert(tile.path.clone(), Arc::clone(&raster));
        Ok(raster)
    }

    fn reduce_plot(
        &self,
        loaded: &mut LoadedTiles,
        mosaic: &Mosaic,
        plot: &Plot,
        operations: &[Reduction],
    ) -> Result<Option<Vec<f64>>> {
        let Some(bounds) = plot.geometry.bounds() else {
            return Ok(None);
        };
        let candidates = mosaic.tiles_intersecting(&bounds);
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut tiles = Vec::with_capacity(candidates.len());
        for tile in candidates {
            tiles.push(Self::load(loaded, tile)?);
        }

        let band_count = mosaic.band_count();
        let mut sampler = Sampler::new(mosaic, band_count);

        match footprint(plot) {
            Footprint::Area(shape) => {
                for tile in &tiles {
                    sampler.sample_area(tile, &shape, &bounds);
                }
                if sampler.cells.is_empty() {
                    if let Some(centroid) = plot.geometry.centroid_coords() {
                        sampler.sample_position(&tiles, centroid);
                    }
                }
            }
            Footprint::Positions(positions) => {
                for position in positions {
                    sampler.sample_position(&tiles, position);
                }
            }
        }

        if sampler.cells.is_empty() {
            return Ok(None);
        }

        let values = sampler
            .accumulators
            .iter()
            .flat_map(|acc| operations.iter().map(move |op| acc.finish(*op)))
            .collect();
        Ok(Some(values))
    }
}


fn footprint(plot: &Plot) -> Footprint {
    match to_geo_geometry(&plot.geometry) {
        shape @ (geo::Geometry::Polygon(_) | geo::Geometry::MultiPolygon(_)) => {
            Footprint::Area(shape)
        }
        _ => Footprint::Positions(plot.geometry.positions().collect()),
    }
}

fn area_contains(shape: &geo::Geometry, point: geo::Point) -> bool {
    match shape {
        geo::Geometry::Polygon(p) => p.contains(&point),
        geo::Geometry::MultiPolygon(mp) => mp.contains(&point),
        _ => false,
    }
}

struct Sampler {
    origin: (f64, f64),
    pixel: (f64, f64),
    cells: HashSet<(i64, i64)>,
    accumulators: Vec<Accumulator>,
}

impl Sampler {
    fn new(mosaic: &Mosaic, band_count: usize) -> Self {
        let bounds = mosaic.bounds();
        Self {
            origin: (bounds.min_x, bounds.max_y),
            pixel: mosaic.pixel_size(),
            cells: HashSet::new(),
            accumulators: vec![Accumulator::default(); band_count],
        }
    }

    /// Mosaic-wide cell of a pixel centre
    fn cell(&self, center: [f64; 2]) -> (i64, i64) {
        (
            ((center[0] - self.origin.0) / self.pixel.0).floor() as i64,
            ((self.origin.1 - center[1]) / self.pixel.1).floor() as i64,
        )
    }

    fn take(&mut self, tile: &RasterTile, col: u32, row: u32) {
        let center = tile.transform.pixel_center(col, row);
        if !self.cells.insert(self.cell(center)) {
            return;
        }
        for (band, acc) in self.accumulators.iter_mut().enumerate() {
            if let Some(value) = tile.value(band, col, row) {
                acc.add(value as f64);
            }
        }
    }

    fn sample_area(
        &mut self,
        tile: &RasterTile,
        shape: &geo::Geometry,
        bounds: &Bounds,
    ) {
        let (c0, r0) = tile.transform.to_pixel(bounds.min_x, bounds.max_y);
        let (c1, r1) = tile.transform.to_pixel(bounds.max_x, bounds.min_y);
        let col_start = c0.floor().max(0.0) as u32;
        let row_start = r0.floor().max(0.0) as u32;
        let col_end = (c1.ceil().max(0.0) as u32).min(tile.width);
        let row_end = (r1.ceil().max(0.0) as u32).min(tile.height);

        for row in row_start..row_end {
            for col in col_start..col_end {
                let [x, y] = tile.transform.pixel_center(col, row);
                if area_contains(shape, geo::Point::new(x, y)) {
                    self.take(tile, col, row);
                }
            }
        }
    }

    fn sample_position(&mut self, tiles: &[Arc<RasterTile>], position: [f64; 2]) {
        if let Some((tile, (col, row))) = tiles
            .iter()
            .find_map(|t| t.pixel_at(position[0], position[1]).map(|px| (t, px)))
        {
            self.take(tile, col, row);
        }
    }
}

impl ZonalStatistics for PixelZonalStatistics {
    fn reduce(
        &self,
        mosaic: &Mosaic,
        plots: &[Plot],
        operations: &[Reduction],
    ) -> Result<PartialTable> {
        let mut table = PartialTable::new(statistic_columns(mosaic.band_names(), operations));
        let mut loaded = LoadedTiles::new();
        for plot in plots {
            match self.reduce_plot(&mut loaded, mosaic, plot, operations)? {
                Some(values) => table.push(plot.id.clone(), values),
                None => tracing::debug!(plot = %plot.id, "No raster coverage for plot"),
            }
        }
        Ok(table)
    }
}
