use serde::{Deserialize, Serialize};
use std::fmt;

use super::Geometry;

/// Stable identifier of a plot within a batch
///
/// Assigned once at ingestion and never reused. Integer ids order
/// numerically and sort before text ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Int(i64),
    Text(String),
}

impl FeatureId {
    /// Parse a JSON value into an id (integers and strings only)
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(FeatureId::Int),
            serde_json::Value::String(s) if !s.trim().is_empty() => {
                Some(FeatureId::Text(s.clone()))
            }
            _ => None,
        }
    }

    /// File-name safe rendering: alphanumerics, `-` and `_` only
    pub fn file_stem(&self) -> String {
        match self {
            FeatureId::Int(i) => i.to_string(),
            FeatureId::Text(s) => s
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect(),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Int(i) => write!(f, "{}", i),
            FeatureId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        FeatureId::Int(value)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        FeatureId::Text(value.to_string())
    }
}

/// One input geometry for which statistics are computed
///
/// Immutable after ingestion; `index` is the position in the input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: FeatureId,
    pub index: usize,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Plot {
    pub fn new(id: impl Into<FeatureId>, index: usize, geometry: Geometry) -> Self {
        Self { id: id.into(), index, geometry, properties: serde_json::Map::new() }
    }

    /// GeoJSON Feature with the id stored under `id_property`
    pub fn to_geojson_feature(&self, id_property: &str) -> serde_json::Value {
        let mut properties = self.properties.clone();
        properties.insert(
            id_property.to_string(),
            serde_json::to_value(&self.id).unwrap_or(serde_json::Value::Null),
        );
        serde_json::json!({
            "type": "Feature",
            "geometry": self.geometry.to_geojson(),
            "properties": properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_ordering() {
        let mut ids = vec![
            FeatureId::from("b"),
            FeatureId::Int(10),
            FeatureId::from("a"),
            FeatureId::Int(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![FeatureId::Int(2), FeatureId::Int(10), FeatureId::from("a"), FeatureId::from("b")]
        );
    }

    #[test]
    fn test_feature_id_from_json() {
        assert_eq!(FeatureId::from_json(&serde_json::json!(7)), Some(FeatureId::Int(7)));
        assert_eq!(FeatureId::from_json(&serde_json::json!("plot-1")), Some(FeatureId::from("plot-1")));
        assert_eq!(FeatureId::from_json(&serde_json::json!(1.5)), None);
        assert_eq!(FeatureId::from_json(&serde_json::json!("  ")), None);
        assert_eq!(FeatureId::from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(FeatureId::from("farm/plot 3").file_stem(), "farm_plot_3");
        assert_eq!(FeatureId::Int(-4).file_stem(), "-4");
    }

    #[test]
    fn test_feature_id_serializes_untagged() {
        assert_eq!(serde_json::to_string(&FeatureId::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&FeatureId::from("x")).unwrap(), "\"x\"");
    }
}
