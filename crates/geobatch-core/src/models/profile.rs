use serde::{Deserialize, Serialize};

/// Dominant geometry kind of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Point,
    Polygon,
    MultiPolygon,
}

/// Read-only summary of a batch, computed once before any network activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    pub feature_count: usize,
    pub mean_area_ha: f64,
    pub max_area_ha: f64,
    pub mean_vertex_count: f64,
    pub max_vertex_count: usize,
    pub file_size_mb: f64,
    pub feature_type: Option<FeatureKind>,
}

impl WorkloadProfile {
    /// Profile of an empty batch
    pub fn empty(file_size_mb: f64) -> Self {
        Self {
            feature_count: 0,
            mean_area_ha: 0.0,
            max_area_ha: 0.0,
            mean_vertex_count: 0.0,
            max_vertex_count: 0,
            file_size_mb,
            feature_type: None,
        }
    }
}
