use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::Plot;

use crate::models::Geometry;

/// Validation result with details
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Validation error with location details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub location: String,
    pub reason: String,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    /// Add an error to the result
    pub fn add_error(&mut self, location: String, reason: String) {
        self.is_valid = false;
        self.errors.push(ValidationError { location, reason });
    }

    fn merge(&mut self, other: ValidationResult) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
    }

    /// All errors joined into one line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.location, e.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a geometry
pub fn validate_geometry(geometry: &Geometry) -> ValidationResult {
    match geometry {
        Geometry::Point { coordinates } => validate_position("Point", coordinates),
        Geometry::LineString { coordinates } => validate_linestring("LineString", coordinates),
        Geometry::Polygon { coordinates } => validate_polygon("Polygon", coordinates),
        Geometry::MultiPoint { coordinates } => {
            let mut result = non_empty("MultiPoint", coordinates.len());
            for (i, position) in coordinates.iter().enumerate() {
                result.merge(validate_position(&format!("MultiPoint[{}]", i), position));
            }
            result
        }
        Geometry::MultiLineString { coordinates } => {
            let mut result = non_empty("MultiLineString", coordinates.len());
            for (i, line) in coordinates.iter().enumerate() {
                result.merge(validate_linestring(&format!("MultiLineString[{}]", i), line));
            }
            result
        }
        Geometry::MultiPolygon { coordinates } => {
            let mut result = non_empty("MultiPolygon", coordinates.len());
            for (i, polygon) in coordinates.iter().enumerate() {
                result.merge(validate_polygon(&format!("MultiPolygon[{}]", i), polygon));
            }
            result
        }
    }
}

/// Reject a plot whose geometry cannot be tiled or reduced
pub fn validate_plot(plot: &Plot) -> Result<()> {
    let result = validate_geometry(&plot.geometry);
    if result.is_valid {
        Ok(())
    } else {
        Err(GeobatchError::InvalidGeometry {
            feature_id: plot.id.to_string(),
            reason: result.summary(),
        })
    }
}

fn non_empty(location: &str, len: usize) -> ValidationResult {
    let mut result = ValidationResult::valid();
    if len == 0 {
        result.add_error(location.to_string(), "Geometry has no members".to_string());
    }
    result
}

fn validate_position(location: &str, position: &[f64; 2]) -> ValidationResult {
    let mut result = ValidationResult::valid();
    if !position[0].is_finite() || !position[1].is_finite() {
        result.add_error(
            format!("{}({}, {})", location, position[0], position[1]),
            "Coordinates must be finite".to_string(),
        );
    }
    result
}

fn validate_linestring(location: &str, coordinates: &[[f64; 2]]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if coordinates.len() < 2 {
        result.add_error(
            location.to_string(),
            format!("LineString must have at least 2 points, found {}", coordinates.len()),
        );
        return result;
    }

    for (i, position) in coordinates.iter().enumerate() {
        result.merge(validate_position(&format!("{}[{}]", location, i), position));
    }

    result
}

fn validate_ring(location: &str, ring: &[[f64; 2]]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if ring.len() < 4 {
        result.add_error(
            location.to_string(),
            format!("Ring must have at least 4 points, found {}", ring.len()),
        );
    }

    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            result.add_error(
                location.to_string(),
                "Ring must be closed (first point == last point)".to_string(),
            );
        }
    }

    for (i, position) in ring.iter().enumerate() {
        result.merge(validate_position(&format!("{}[{}]", location, i), position));
    }

    result
}

fn validate_polygon(location: &str, rings: &[Vec<[f64; 2]>]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let Some((exterior, interiors)) = rings.split_first() else {
        result.add_error(location.to_string(), "Polygon has no exterior ring".to_string());
        return result;
    };

    result.merge(validate_ring(&format!("{} exterior", location), exterior));
    for (i, interior) in interiors.iter().enumerate() {
        result.merge(validate_ring(&format!("{} interior[{}]", location, i), interior));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_polygon() {
        let polygon = Geometry::polygon(vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
            [0.0, 0.0],
        ]]);
        assert!(validate_geometry(&polygon).is_valid);
    }

    #[test]
    fn test_invalid_polygon_not_closed() {
        let polygon =
            Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]);
        let result = validate_geometry(&polygon);
        assert!(!result.is_valid);
        assert!(result.summary().contains("closed"));
    }

    #[test]
    fn test_invalid_polygon_too_few_points() {
        let polygon = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]);
        let result = validate_geometry(&polygon);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.reason.contains("at least 4 points")));
    }

    #[test]
    fn test_non_finite_point() {
        assert!(!validate_geometry(&Geometry::point(f64::NAN, 0.0)).is_valid);
        assert!(!validate_geometry(&Geometry::point(0.0, f64::INFINITY)).is_valid);
        assert!(validate_geometry(&Geometry::point(1.0, 2.0)).is_valid);
    }

    #[test]
    fn test_empty_multipolygon() {
        let result = validate_geometry(&Geometry::MultiPolygon { coordinates: vec![] });
        assert!(!result.is_valid);
    }

    #[test]
    fn test_validate_plot_error_carries_feature_id() {
        let plot = Plot::new("farm-7", 0, Geometry::Polygon { coordinates: vec![] });
        match validate_plot(&plot) {
            Err(GeobatchError::InvalidGeometry { feature_id, reason }) => {
                assert_eq!(feature_id, "farm-7");
                assert!(reason.contains("exterior"));
            }
            other => panic!("expected InvalidGeometry, got {:?}", other),
        }
    }
}
