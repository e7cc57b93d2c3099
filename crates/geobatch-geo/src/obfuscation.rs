//! Request obfuscation.
//!
//! A `GeometryTransform` runs over the tile regions planned for a batch,
//! before any of them is sent to the remote service. `DecoyTransform` adds
//! fabricated regions so the service cannot tell which areas are real. Decoys
//! carry a `decoy_` file stem and are dropped again by the mosaic's exclude
//! pattern.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use geobatch_core::models::Bounds;

/// Prefix of every decoy file stem
pub const DECOY_PREFIX: &str = "decoy_";

const KM_PER_DEGREE: f64 = 111.32;
const MAX_LATITUDE: f64 = 85.0;

/// One rectangular area to request from the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRegion {
    /// Output file name without extension
    pub file_stem: String,
    pub bounds: Bounds,
    pub decoy: bool,
}

impl TileRegion {
    pub fn real(file_stem: impl Into<String>, bounds: Bounds) -> Self {
        Self { file_stem: file_stem.into(), bounds, decoy: false }
    }
}

/// Rewrites the set of regions requested for a batch
pub trait GeometryTransform: Send + Sync {
    fn apply(&self, regions: Vec<TileRegion>) -> Vec<TileRegion>;
}

/// Leaves regions untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl GeometryTransform for IdentityTransform {
    fn apply(&self, regions: Vec<TileRegion>) -> Vec<TileRegion> {
        regions
    }
}

/// Adds shifted copies of every real region and shuffles the result
pub struct DecoyTransform {
    decoys_per_region: usize,
    min_shift_km: f64,
    max_shift_km: f64,
    state: Mutex<DecoyState>,
}

struct DecoyState {
    rng: StdRng,
    // Decoy stems stay unique across repeated `apply` calls
    next_id: usize,
}

impl DecoyTransform {
    pub fn new(decoys_per_region: usize, min_shift_km: f64, max_shift_km: f64, seed: u64) -> Self {
        let (min_shift_km, max_shift_km) = if min_shift_km <= max_shift_km {
            (min_shift_km.max(0.0), max_shift_km.max(0.0))
        } else {
            (max_shift_km.max(0.0), min_shift_km.max(0.0))
        };
        Self {
            decoys_per_region,
            min_shift_km,
            max_shift_km,
            state: Mutex::new(DecoyState { rng: StdRng::seed_from_u64(seed), next_id: 0 }),
        }
    }

    fn shifted(&self, rng: &mut StdRng, bounds: &Bounds) -> Bounds {
        let distance_km = if self.max_shift_km > self.min_shift_km {
            rng.gen_range(self.min_shift_km..=self.max_shift_km)
        } else {
            self.min_shift_km
        };
        let bearing = rng.gen_range(0.0..std::f64::consts::TAU);

        let [_, center_y] = bounds.center();
        let cos_lat = center_y.to_radians().cos().max(0.01);
        let dx = distance_km * bearing.cos() / (KM_PER_DEGREE * cos_lat);
        let mut dy = distance_km * bearing.sin() / KM_PER_DEGREE;

        // Keep the decoy on the globe
        if bounds.max_y + dy > MAX_LATITUDE || bounds.min_y + dy < -MAX_LATITUDE {
            dy = -dy;
        }

        let moved = bounds.translate(dx, dy);
        Bounds::new(
            wrap_longitude(moved.min_x),
            moved.min_y,
            wrap_longitude(moved.min_x) + bounds.width(),
            moved.max_y,
        )
    }
}

fn wrap_longitude(x: f64) -> f64 {
    (x + 180.0).rem_euclid(360.0) - 180.0
}

impl GeometryTransform for DecoyTransform {
    fn apply(&self, regions: Vec<TileRegion>) -> Vec<TileRegion> {
        if self.decoys_per_region == 0 {
            return regions;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *state;
        let mut output = Vec::with_capacity(regions.len() * (self.decoys_per_region + 1));
        let mut added = 0usize;

        for region in regions {
            if !region.decoy {
                for _ in 0..self.decoys_per_region {
                    output.push(TileRegion {
                        file_stem: format!("{}{:06}", DECOY_PREFIX, state.next_id),
                        bounds: self.shifted(&mut state.rng, &region.bounds),
                        decoy: true,
                    });
                    state.next_id += 1;
                    added += 1;
                }
            }
            output.push(region);
        }

        output.shuffle(&mut state.rng);
        tracing::debug!(decoys = added, total = output.len(), "Added decoy regions");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<TileRegion> {
        vec![
            TileRegion::real("plot_000000_1", Bounds::new(10.0, 5.0, 10.01, 5.01)),
            TileRegion::real("plot_000001_2", Bounds::new(11.0, 6.0, 11.02, 6.02)),
        ]
    }

    #[test]
    fn test_identity() {
        assert_eq!(IdentityTransform.apply(regions()), regions());
    }

    #[test]
    fn test_decoys_added_and_reals_kept() {
        let transform = DecoyTransform::new(3, 5.0, 20.0, 42);
        let output = transform.apply(regions());

        assert_eq!(output.len(), 8);
        assert_eq!(output.iter().filter(|r| r.decoy).count(), 6);
        for real in regions() {
            assert!(output.contains(&real));
        }
        for decoy in output.iter().filter(|r| r.decoy) {
            assert!(decoy.file_stem.starts_with(DECOY_PREFIX));
        }
    }

    #[test]
    fn test_decoys_keep_size_and_shift_within_range() {
        let transform = DecoyTransform::new(20, 5.0, 20.0, 7);
        let original = Bounds::new(10.0, 5.0, 10.01, 5.01);
        let output = transform.apply(vec![TileRegion::real("plot", original)]);

        for decoy in output.iter().filter(|r| r.decoy) {
            assert!((decoy.bounds.width() - original.width()).abs() < 1e-9);
            assert!((decoy.bounds.height() - original.height()).abs() < 1e-9);

            let [cx, cy] = decoy.bounds.center();
            let [ox, oy] = original.center();
            let dx_km = (cx - ox) * KM_PER_DEGREE * oy.to_radians().cos();
            let dy_km = (cy - oy) * KM_PER_DEGREE;
            let distance = (dx_km * dx_km + dy_km * dy_km).sqrt();
            assert!(distance > 4.9 && distance < 20.1, "distance {}", distance);
        }
    }

    #[test]
    fn test_same_seed_same_decoys() {
        let a = DecoyTransform::new(2, 1.0, 2.0, 99).apply(regions());
        let b = DecoyTransform::new(2, 1.0, 2.0, 99).apply(regions());
        assert_eq!(a, b);
    }

    #[test]
    fn test_decoy_stems_unique_across_calls() {
        let transform = DecoyTransform::new(1, 1.0, 2.0, 5);
        let first = transform.apply(regions());
        let second = transform.apply(regions());

        let mut stems: Vec<_> =
            first.iter().chain(&second).filter(|r| r.decoy).map(|r| r.file_stem.clone()).collect();
        stems.sort();
        stems.dedup();
        assert_eq!(stems.len(), 4);
    }

    #[test]
    fn test_zero_decoys_is_identity() {
        assert_eq!(DecoyTransform::new(0, 1.0, 2.0, 1).apply(regions()), regions());
    }
}
