//! Execution mode selection.
//!
//! Picks between one-at-a-time and concurrent remote reduction from the
//! workload profile. The local path is never suggested here; callers choose
//! it when remote reduction is unwanted.

use geobatch_core::models::{ExecutionMode, FeatureKind, WorkloadProfile};

/// Source files at least this large always run sequentially
pub const LARGE_FILE_MB: f64 = 10.0;

/// Point batches switch to concurrent at this many features
pub const POINT_BREAKEVEN: usize = 750;

/// Mean vertex count from which geometries count as complex
pub const COMPLEX_VERTEX_COUNT: f64 = 50.0;

/// Threshold multiplier for complex geometries
pub const COMPLEXITY_FACTOR: f64 = 0.8;

/// Breakeven feature count by minimum mean plot area (ha), largest first
const AREA_BREAKEVEN: [(f64, usize); 4] = [(20.0, 250), (5.0, 250), (1.0, 500), (0.0, 500)];

/// Feature count at which concurrent reduction beats sequential
pub fn breakeven_threshold(mean_area_ha: f64, mean_vertices: f64) -> usize {
    let base = AREA_BREAKEVEN
        .iter()
        .find(|(min_area, _)| mean_area_ha >= *min_area)
        .map(|(_, threshold)| *threshold)
        .unwrap_or(AREA_BREAKEVEN[AREA_BREAKEVEN.len() - 1].1);

    if mean_vertices >= COMPLEX_VERTEX_COUNT {
        (base as f64 * COMPLEXITY_FACTOR).round() as usize
    } else {
        base
    }
}

/// Suggest a remote execution mode
pub fn suggest_mode(
    feature_count: usize,
    mean_area_ha: f64,
    mean_vertices: f64,
    file_size_mb: f64,
    feature_type: Option<FeatureKind>,
) -> ExecutionMode {
    if file_size_mb >= LARGE_FILE_MB {
        return ExecutionMode::Sequential;
    }

    let threshold = match feature_type {
        Some(FeatureKind::Point) => POINT_BREAKEVEN,
        _ => breakeven_threshold(mean_area_ha, mean_vertices),
    };

    if feature_count >= threshold {
        ExecutionMode::Concurrent
    } else {
        ExecutionMode::Sequential
    }
}

/// [`suggest_mode`] over a computed profile
pub fn suggest_mode_for(profile: &WorkloadProfile) -> ExecutionMode {
    suggest_mode(
        profile.feature_count,
        profile.mean_area_ha,
        profile.mean_vertex_count,
        profile.file_size_mb,
        profile.feature_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = Option<FeatureKind>> {
        prop_oneof![
            Just(None),
            Just(Some(FeatureKind::Point)),
            Just(Some(FeatureKind::Polygon)),
            Just(Some(FeatureKind::MultiPolygon)),
        ]
    }

    #[test]
    fn test_small_polygon_batch_is_sequential() {
        let mode = suggest_mode(3, 1.0, 5.0, 0.01, Some(FeatureKind::Polygon));
        assert_eq!(mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_many_points_are_concurrent() {
        assert_eq!(
            suggest_mode(1000, 0.0, 1.0, 0.2, Some(FeatureKind::Point)),
            ExecutionMode::Concurrent
        );
        assert_eq!(
            suggest_mode(749, 0.0, 1.0, 0.2, Some(FeatureKind::Point)),
            ExecutionMode::Sequential
        );
    }

    #[test]
    fn test_large_file_always_sequential() {
        for kind in [None, Some(FeatureKind::Point), Some(FeatureKind::MultiPolygon)] {
            assert_eq!(suggest_mode(1_000_000, 50.0, 500.0, 15.0, kind), ExecutionMode::Sequential);
        }
    }

    #[test]
    fn test_area_bands() {
        assert_eq!(breakeven_threshold(25.0, 10.0), 250);
        assert_eq!(breakeven_threshold(5.0, 10.0), 250);
        assert_eq!(breakeven_threshold(4.9, 10.0), 500);
        assert_eq!(breakeven_threshold(0.2, 10.0), 500);
    }

    #[test]
    fn test_complex_geometries_lower_threshold() {
        assert_eq!(breakeven_threshold(25.0, 50.0), 200);
        assert_eq!(breakeven_threshold(0.5, 120.0), 400);
        assert_eq!(
            suggest_mode(400, 0.5, 120.0, 1.0, Some(FeatureKind::Polygon)),
            ExecutionMode::Concurrent
        );
        assert_eq!(
            suggest_mode(400, 0.5, 10.0, 1.0, Some(FeatureKind::Polygon)),
            ExecutionMode::Sequential
        );
    }

    #[test]
    fn test_profile_wrapper() {
        let mut profile = WorkloadProfile::empty(0.5);
        profile.feature_count = 300;
        profile.mean_area_ha = 30.0;
        profile.mean_vertex_count = 8.0;
        profile.feature_type = Some(FeatureKind::Polygon);
        assert_eq!(suggest_mode_for(&profile), ExecutionMode::Concurrent);
    }

    proptest! {
        #[test]
        fn prop_idempotent(
            count in 0usize..5000,
            area in 0.0f64..100.0,
            vertices in 0.0f64..500.0,
            size in 0.0f64..20.0,
            kind in kind_strategy(),
        ) {
            let first = suggest_mode(count, area, vertices, size, kind);
            for _ in 0..3 {
                prop_assert_eq!(suggest_mode(count, area, vertices, size, kind), first);
            }
            prop_assert_ne!(first, ExecutionMode::Local);
        }

        #[test]
        fn prop_flips_once(
            area in 0.0f64..100.0,
            vertices in 0.0f64..500.0,
            size in 0.0f64..9.99,
            kind in kind_strategy(),
        ) {
            let mut flips = 0;
            let mut previous = suggest_mode(0, area, vertices, size, kind);
            prop_assert_eq!(previous, ExecutionMode::Sequential);
            for count in 1..1000 {
                let mode = suggest_mode(count, area, vertices, size, kind);
                if mode != previous {
                    prop_assert_eq!(mode, ExecutionMode::Concurrent);
                    flips += 1;
                }
                previous = mode;
            }
            prop_assert_eq!(flips, 1);
        }
    }
}
