//! Workload profiling.

use geobatch_core::models::{FeatureKind, Geometry, Plot, WorkloadProfile};

use crate::models::GeometryExt;

/// Summarize a batch before any network activity
///
/// `feature_type` is the most common kind among the plots; line geometries
/// have no kind and ties resolve to the simpler kind.
pub fn profile_plots(plots: &[Plot], file_size_mb: f64) -> WorkloadProfile {
    if plots.is_empty() {
        return WorkloadProfile::empty(file_size_mb);
    }

    let mut total_area = 0.0;
    let mut max_area: f64 = 0.0;
    let mut total_vertices = 0usize;
    let mut max_vertices = 0usize;
    // point, polygon, multipolygon
    let mut kinds = [0usize; 3];

    for plot in plots {
        let area = plot.geometry.area_ha();
        let vertices = plot.geometry.vertex_count();
        total_area += area;
        max_area = max_area.max(area);
        total_vertices += vertices;
        max_vertices = max_vertices.max(vertices);

        match feature_kind(&plot.geometry) {
            Some(FeatureKind::Point) => kinds[0] += 1,
            Some(FeatureKind::Polygon) => kinds[1] += 1,
            Some(FeatureKind::MultiPolygon) => kinds[2] += 1,
            None => {}
        }
    }

    let count = plots.len() as f64;
    let profile = WorkloadProfile {
        feature_count: plots.len(),
        mean_area_ha: total_area / count,
        max_area_ha: max_area,
        mean_vertex_count: total_vertices as f64 / count,
        max_vertex_count: max_vertices,
        file_size_mb,
        feature_type: dominant_kind(kinds),
    };

    tracing::debug!(
        features = profile.feature_count,
        mean_area_ha = profile.mean_area_ha,
        mean_vertices = profile.mean_vertex_count,
        "Computed workload profile"
    );

    profile
}

/// Kind of one geometry; multi-points count as points
pub fn feature_kind(geometry: &Geometry) -> Option<FeatureKind> {
    match geometry {
        Geometry::Point { .. } | Geometry::MultiPoint { .. } => Some(FeatureKind::Point),
        Geometry::Polygon { .. } => Some(FeatureKind::Polygon),
        Geometry::MultiPolygon { .. } => Some(FeatureKind::MultiPolygon),
        Geometry::LineString { .. } | Geometry::MultiLineString { .. } => None,
    }
}

fn dominant_kind(counts: [usize; 3]) -> Option<FeatureKind> {
    let kinds = [FeatureKind::Point, FeatureKind::Polygon, FeatureKind::MultiPolygon];
    let mut best: Option<(FeatureKind, usize)> = None;
    for (kind, count) in kinds.into_iter().zip(counts) {
        if count > 0 && best.map_or(true, |(_, c)| count > c) {
            best = Some((kind, count));
        }
    }
    best.map(|(kind, _)| kind)
}
