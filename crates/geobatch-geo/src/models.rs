//! Geometry models for geobatch-geo.
//!
//! Re-exports the canonical types from `geobatch-core` and converts them to
//! `geo` crate types for measurement.

use geo::{Centroid, CoordsIter, GeodesicArea, Geometry as GeoGeometry};

pub use geobatch_core::models::{Bounds, Crs, Geometry, GeometryType};

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

fn line(coords: &[[f64; 2]]) -> geo::LineString {
    geo::LineString::new(coords.iter().map(|c| geo::Coord { x: c[0], y: c[1] }).collect())
}

fn polygon(rings: &[Vec<[f64; 2]>]) -> geo::Polygon {
    match rings.split_first() {
        Some((exterior, interiors)) => {
            geo::Polygon::new(line(exterior), interiors.iter().map(|r| line(r)).collect())
        }
        None => geo::Polygon::new(geo::LineString::new(vec![]), vec![]),
    }
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> GeoGeometry {
    match geom {
        Geometry::Point { coordinates } => {
            GeoGeometry::Point(geo::Point::new(coordinates[0], coordinates[1]))
        }
        Geometry::LineString { coordinates } => GeoGeometry::LineString(line(coordinates)),
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(polygon(coordinates)),
        Geometry::MultiPoint { coordinates } => GeoGeometry::MultiPoint(geo::MultiPoint::new(
            coordinates.iter().map(|c| geo::Point::new(c[0], c[1])).collect(),
        )),
        Geometry::MultiLineString { coordinates } => GeoGeometry::MultiLineString(
            geo::MultiLineString::new(coordinates.iter().map(|l| line(l)).collect()),
        ),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(
            geo::MultiPolygon::new(coordinates.iter().map(|p| polygon(p)).collect()),
        ),
    }
}

/// Extension trait for Geometry measurements
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> GeoGeometry;

    /// Centroid as `[x, y]`, `None` for empty geometries
    fn centroid_coords(&self) -> Option<[f64; 2]>;

    /// Geodesic area on the WGS 84 ellipsoid, in hectares
    fn area_ha(&self) -> f64;

    /// Number of positions, ring closures included
    fn vertex_count(&self) -> usize;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> GeoGeometry {
        to_geo_geometry(self)
    }

    fn centroid_coords(&self) -> Option<[f64; 2]> {
        self.to_geo().centroid().map(|p| [p.x(), p.y()])
    }

    fn area_ha(&self) -> f64 {
        let square_meters = match self.to_geo() {
            GeoGeometry::Polygon(p) => p.geodesic_area_unsigned(),
            GeoGeometry::MultiPolygon(mp) => mp.geodesic_area_unsigned(),
            _ => 0.0,
        };
        square_meters / SQUARE_METERS_PER_HECTARE
    }

    fn vertex_count(&self) -> usize {
        self.to_geo().coords_count()
    }
}
