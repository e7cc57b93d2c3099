//! Canonical geometry types used across all geobatch crates.
//!
//! These types provide a bridge between GeoJSON serialization and the
//! computational geo crate types.

use serde::{Deserialize, Serialize};

/// Coordinate Reference System identified by EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
    pub name: String,
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Crs {
    pub fn new(epsg: u32, name: impl Into<String>) -> Self {
        Self { epsg, name: name.into() }
    }

    /// WGS 84 (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::new(4326, "WGS 84")
    }

    /// Authority code as sent to the remote service, e.g. `EPSG:4326`
    pub fn code(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }

    /// Parse an `EPSG:nnnn` code
    pub fn parse(code: &str) -> Option<Self> {
        let epsg = code.trim().strip_prefix("EPSG:").or_else(|| code.trim().strip_prefix("epsg:"))?;
        let epsg: u32 = epsg.parse().ok()?;
        if epsg == 4326 {
            Some(Self::wgs84())
        } else {
            Some(Self::new(epsg, format!("EPSG:{}", epsg)))
        }
    }
}

/// Geometry type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GeometryType {
    #[default]
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

/// GeoJSON-compatible geometry representation
///
/// This enum directly maps to GeoJSON geometry types with coordinate arrays.
/// It can be serialized/deserialized as GeoJSON and converted to/from `geo` crate types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Create a Point geometry
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Axis-aligned rectangle as a closed polygon
    pub fn rectangle(bounds: &Bounds) -> Self {
        Geometry::polygon(vec![vec![
            [bounds.min_x, bounds.min_y],
            [bounds.max_x, bounds.min_y],
            [bounds.max_x, bounds.max_y],
            [bounds.min_x, bounds.max_y],
            [bounds.min_x, bounds.min_y],
        ]])
    }

    /// Get the geometry type
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point { .. } => GeometryType::Point,
            Geometry::LineString { .. } => GeometryType::LineString,
            Geometry::Polygon { .. } => GeometryType::Polygon,
            Geometry::MultiPoint { .. } => GeometryType::MultiPoint,
            Geometry::MultiLineString { .. } => GeometryType::MultiLineString,
            Geometry::MultiPolygon { .. } => GeometryType::MultiPolygon,
        }
    }

    /// Every position of the geometry, rings included
    pub fn positions(&self) -> Box<dyn Iterator<Item = [f64; 2]> + '_> {
        match self {
            Geometry::Point { coordinates } => Box::new(std::iter::once(*coordinates)),
            Geometry::LineString { coordinates } | Geometry::MultiPoint { coordinates } => {
                Box::new(coordinates.iter().copied())
            }
            Geometry::Polygon { coordinates } | Geometry::MultiLineString { coordinates } => {
                Box::new(coordinates.iter().flatten().copied())
            }
            Geometry::MultiPolygon { coordinates } => {
                Box::new(coordinates.iter().flatten().flatten().copied())
            }
        }
    }

    /// Bounding box of all positions, `None` for an empty geometry
    pub fn bounds(&self) -> Option<Bounds> {
        let mut positions = self.positions();
        let first = positions.next()?;
        let mut bounds = Bounds::new(first[0], first[1], first[0], first[1]);
        for [x, y] in positions {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    /// Try to parse from a serde_json::Value (GeoJSON)
    pub fn from_geojson(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Convert to serde_json::Value (GeoJSON)
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Axis-aligned bounding box in CRS units (degrees for EPSG:4326)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> [f64; 2] {
        [(self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0]
    }

    /// Closed-interval overlap test
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Smallest box covering both
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Grow on every side by `dx`/`dy`
    pub fn expand(&self, dx: f64, dy: f64) -> Bounds {
        Bounds::new(self.min_x - dx, self.min_y - dy, self.max_x + dx, self.max_y + dy)
    }

    /// Shift by an offset
    pub fn translate(&self, dx: f64, dy: f64) -> Bounds {
        Bounds::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Smallest absolute latitude covered (0 when the box straddles the equator)
    pub fn min_abs_latitude(&self) -> f64 {
        if self.min_y <= 0.0 && self.max_y >= 0.0 {
            0.0
        } else {
            self.min_y.abs().min(self.max_y.abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_serialization() {
        let point = Geometry::point(115.0, -8.5);
        let json = serde_json::to_string(&point).unwrap();
        assert!(json.contains("Point"));
        assert!(json.contains("115"));

        let parsed: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(point, parsed);
    }

    #[test]
    fn test_polygon_bounds() {
        let polygon = Geometry::polygon(vec![vec![
            [10.0, 1.0],
            [12.0, 1.0],
            [12.0, 4.0],
            [10.0, 1.0],
        ]]);
        let bounds = polygon.bounds().unwrap();
        assert_eq!(bounds, Bounds::new(10.0, 1.0, 12.0, 4.0));
        assert_eq!(bounds.width(), 2.0);
        assert_eq!(bounds.height(), 3.0);
    }

    #[test]
    fn test_empty_geometry_has_no_bounds() {
        let empty = Geometry::MultiPolygon { coordinates: vec![] };
        assert!(empty.bounds().is_none());
    }

    #[test]
    fn test_rectangle_round_trips_bounds() {
        let bounds = Bounds::new(-1.0, -2.0, 3.0, 4.0);
        assert_eq!(Geometry::rectangle(&bounds).bounds(), Some(bounds));
    }

    #[test]
    fn test_min_abs_latitude() {
        assert_eq!(Bounds::new(0.0, -5.0, 1.0, 5.0).min_abs_latitude(), 0.0);
        assert_eq!(Bounds::new(0.0, 40.0, 1.0, 45.0).min_abs_latitude(), 40.0);
        assert_eq!(Bounds::new(0.0, -45.0, 1.0, -40.0).min_abs_latitude(), 40.0);
    }

    #[test]
    fn test_crs_codes() {
        assert_eq!(Crs::wgs84().code(), "EPSG:4326");
        assert_eq!(Crs::parse("EPSG:4326"), Some(Crs::wgs84()));
        assert_eq!(Crs::parse("epsg:3857").map(|c| c.epsg), Some(3857));
        assert!(Crs::parse("WGS84").is_none());
    }
}
