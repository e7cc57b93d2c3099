//! GeoJSON plot reader

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::{FileCache, FsStat, SystemClock};
use crate::error::{GeobatchError, Result};
use crate::models::{FeatureId, Geometry, Plot};

/// Parse plots from GeoJSON text
///
/// Ids come from `id_property` when present, then from the Feature `id`,
/// then from the feature index. Features without geometry are skipped.
pub fn parse_plots(content: &str, id_property: Option<&str>) -> Result<Vec<Plot>> {
    let geojson: geojson::GeoJson = content.parse().map_err(|e| GeobatchError::Format {
        format: "GeoJSON".to_string(),
        reason: format!("Failed to parse GeoJSON: {}", e),
    })?;

    let features: Vec<geojson::Feature> = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => fc.features,
        geojson::GeoJson::Feature(feature) => vec![feature],
        geojson::GeoJson::Geometry(geom) => vec![geojson::Feature::from(geom)],
    };

    let mut plots = Vec::with_capacity(features.len());
    let mut seen = HashSet::new();

    for (index, feature) in features.into_iter().enumerate() {
        let geometry = match &feature.geometry {
            Some(geom) => {
                let value = serde_json::to_value(geom).map_err(|e| {
                    GeobatchError::Serialization(format!("Failed to serialize geometry: {}", e))
                })?;
                geometry_from_json(&value).ok_or_else(|| GeobatchError::Format {
                    format: "GeoJSON".to_string(),
                    reason: format!("Unsupported geometry at feature {}", index),
                })?
            }
            None => {
                tracing::warn!(feature = index, "Skipping feature without geometry");
                continue;
            }
        };

        let properties = feature.properties.clone().unwrap_or_default();
        let id = id_property
            .and_then(|key| properties.get(key))
            .and_then(FeatureId::from_json)
            .or_else(|| feature.id.as_ref().and_then(feature_id_from_geojson))
            .unwrap_or(FeatureId::Int(index as i64));

        if !seen.insert(id.clone()) {
            return Err(GeobatchError::DuplicateFeatureId { feature_id: id.to_string() });
        }

        plots.push(Plot { id, index, geometry, properties });
    }

    Ok(plots)
}

/// Read plots from a GeoJSON file
pub fn read_plots<P: AsRef<Path>>(path: P, id_property: Option<&str>) -> Result<Vec<Plot>> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_plots(&content, id_property)
}

fn feature_id_from_geojson(id: &geojson::feature::Id) -> Option<FeatureId> {
    match id {
        geojson::feature::Id::String(s) => FeatureId::from_json(&Value::String(s.clone())),
        geojson::feature::Id::Number(n) => n.as_i64().map(FeatureId::Int),
    }
}

/// Lenient geometry conversion: extra ordinates (z, m) are dropped
fn geometry_from_json(value: &Value) -> Option<Geometry> {
    let coords = value.get("coordinates")?;
    match value.get("type")?.as_str()? {
        "Point" => Some(Geometry::Point { coordinates: position(coords)? }),
        "MultiPoint" => Some(Geometry::MultiPoint { coordinates: positions(coords)? }),
        "LineString" => Some(Geometry::LineString { coordinates: positions(coords)? }),
        "MultiLineString" => Some(Geometry::MultiLineString { coordinates: rings(coords)? }),
        "Polygon" => Some(Geometry::Polygon { coordinates: rings(coords)? }),
        "MultiPolygon" => Some(Geometry::MultiPolygon {
            coordinates: coords.as_array()?.iter().map(rings).collect::<Option<Vec<_>>>()?,
        }),
        _ => None,
    }
}

fn position(value: &Value) -> Option<[f64; 2]> {
    let array = value.as_array()?;
    Some([array.first()?.as_f64()?, array.get(1)?.as_f64()?])
}

fn positions(value: &Value) -> Option<Vec<[f64; 2]>> {
    value.as_array()?.iter().map(position).collect()
}

fn rings(value: &Value) -> Option<Vec<Vec<[f64; 2]>>> {
    value.as_array()?.iter().map(positions).collect()
}

/// Plot reader that parses each unchanged file once
pub struct PlotReader {
    id_property: Option<String>,
    cache: FileCache<Vec<Plot>, FsStat, SystemClock>,
}

impl PlotReader {
    pub fn new(id_property: Option<String>) -> Self {
        Self { id_property, cache: FileCache::new() }
    }

    /// Plots of `path`, parsed on first use and whenever the file changes
    pub fn read(&self, path: &Path) -> Result<Arc<Vec<Plot>>> {
        let id_property = self.id_property.clone();
        self.cache.get_or_load(path, |p| read_plots(p, id_property.as_deref()))
    }

    /// Size of the source file in megabytes
    pub fn file_size_mb(path: &Path) -> Result<f64> {
        Ok(fs::metadata(path)?.len() as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"plot_id": "farm-a"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type": "Feature", "properties": {"plot_id": 42},
             "geometry": {"type": "Point", "coordinates": [5.0, 6.0, 120.0]}},
            {"type": "Feature", "properties": {},
             "geometry": null}
        ]
    }"#;

    #[test]
    fn test_parse_with_id_property() {
        let plots = parse_plots(COLLECTION, Some("plot_id")).unwrap();

        assert_eq!(plots.len(), 2);
        assert_eq!(plots[0].id, FeatureId::from("farm-a"));
        assert_eq!(plots[1].id, FeatureId::Int(42));
        assert_eq!(plots[1].geometry, Geometry::point(5.0, 6.0));
        assert_eq!(plots[1].index, 1);
    }

    #[test]
    fn test_parse_falls_back_to_index() {
        let plots = parse_plots(COLLECTION, None).unwrap();
        assert_eq!(plots[0].id, FeatureId::Int(0));
        assert_eq!(plots[1].id, FeatureId::Int(1));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [0, 0]}},
                {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [1, 1]}}
            ]
        }"#;

        let result = parse_plots(content, Some("id"));
        assert!(matches!(result, Err(GeobatchError::DuplicateFeatureId { .. })));
    }

    #[test]
    fn test_bare_geometry() {
        let plots = parse_plots(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#, None).unwrap();
        assert_eq!(plots.len(), 1);
        assert_eq!(plots[0].id, FeatureId::Int(0));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_plots("not json", None), Err(GeobatchError::Format { .. })));
    }

    #[test]
    fn test_reader_caches_unchanged_file() {
        use std::io::Write;
        let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
        write!(file, "{}", COLLECTION).unwrap();

        let reader = PlotReader::new(Some("plot_id".to_string()));
        let first = reader.read(file.path()).unwrap();
        let second = reader.read(file.path()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(PlotReader::file_size_mb(file.path()).unwrap() > 0.0);
    }
}
