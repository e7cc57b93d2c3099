//! Geometry tile planner.
//!
//! Sizes square raster tiles so that a full multi-band extract stays under the
//! remote service's payload ceiling. Height in degrees is fixed by the pixel
//! count and scale; width widens with `1 / cos(latitude)` so the ground
//! footprint stays the same.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use geobatch_core::config::EngineSettings;
use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::Bounds;

/// Meters per degree of latitude used for tile sizing
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Floor on `cos(latitude)`; keeps tiles finite near the poles
pub const MIN_COS_LATITUDE: f64 = 0.1;

/// Size of one tile at one latitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TilePlan {
    pub pixels_per_side: u64,
    pub width_deg: f64,
    pub height_deg: f64,
}

impl TilePlan {
    /// Uncompressed payload of a full tile
    pub fn estimated_bytes(&self, band_count: u32, bytes_per_band: u32) -> u128 {
        let side = self.pixels_per_side as u128;
        side * side * band_count as u128 * bytes_per_band as u128
    }
}

/// Compute the largest tile whose payload fits `byte_limit * safety_margin`
pub fn plan_tile(
    band_count: u32,
    scale_m: f64,
    byte_limit: u64,
    bytes_per_band: u32,
    safety_margin: f64,
    latitude: f64,
) -> Result<TilePlan> {
    if band_count == 0 || bytes_per_band == 0 {
        return Err(GeobatchError::ConfigInvalid {
            key: "bands".to_string(),
            reason: "band count and bytes per band must be at least 1".to_string(),
        });
    }
    if !scale_m.is_finite() || scale_m <= 0.0 {
        return Err(GeobatchError::ConfigInvalid {
            key: "scale_m".to_string(),
            reason: format!("scale must be a positive number of meters, got {}", scale_m),
        });
    }

    let max_bytes = byte_limit as f64 * safety_margin;
    let bytes_per_pixel = band_count as u64 * bytes_per_band as u64;
    let fits = |side: u64| {
        let side = side as u128;
        (side * side * bytes_per_pixel as u128) as f64 <= max_bytes
    };

    let estimate = (max_bytes / bytes_per_pixel as f64).sqrt();
    let mut pixels_per_side = if estimate.is_finite() && estimate > 0.0 {
        estimate.floor() as u64
    } else {
        0
    };
    // Correct floating point error in the square root on either side
    while fits(pixels_per_side + 1) {
        pixels_per_side += 1;
    }
    while pixels_per_side > 0 && !fits(pixels_per_side) {
        pixels_per_side -= 1;
    }

    if pixels_per_side == 0 {
        return Err(GeobatchError::TilePlanInfeasible {
            band_count,
            bytes_per_pixel,
            max_bytes,
        });
    }

    let height_deg = pixels_per_side as f64 * scale_m / METERS_PER_DEGREE;
    let width_deg = height_deg / latitude.to_radians().cos().max(MIN_COS_LATITUDE);

    Ok(TilePlan { pixels_per_side, width_deg, height_deg })
}

/// Per-run planner that memoizes plans per whole-degree latitude band
///
/// A planner belongs to one run and one band count; nothing is shared
/// between runs.
#[derive(Debug)]
pub struct TilePlanner {
    band_count: u32,
    scale_m: f64,
    byte_limit: u64,
    bytes_per_band: u32,
    safety_margin: f64,
    plans: Mutex<HashMap<u32, TilePlan>>,
}

impl TilePlanner {
    pub fn new(
        band_count: u32,
        scale_m: f64,
        byte_limit: u64,
        bytes_per_band: u32,
        safety_margin: f64,
    ) -> Self {
        Self {
            band_count,
            scale_m,
            byte_limit,
            bytes_per_band,
            safety_margin,
            plans: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(band_count: u32, settings: &EngineSettings) -> Self {
        Self::new(
            band_count,
            settings.scale_m,
            settings.byte_limit,
            settings.bytes_per_band,
            settings.safety_margin,
        )
    }

    /// A fresh planner with a different safety margin
    pub fn with_margin(&self, safety_margin: f64) -> Self {
        Self::new(self.band_count, self.scale_m, self.byte_limit, self.bytes_per_band, safety_margin)
    }

    pub fn band_count(&self) -> u32 {
        self.band_count
    }

    pub fn scale_m(&self) -> f64 {
        self.scale_m
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Whole-degree band of `|latitude|`, rounded toward the equator
    pub fn latitude_band(latitude: f64) -> u32 {
        latitude.abs().min(90.0).floor() as u32
    }

    /// Plan for the band containing `latitude`
    ///
    /// The band's equator-side edge is used, which gives the narrowest tile
    /// in the band, so the plan stays within budget anywhere inside it.
    pub fn plan_for_latitude(&self, latitude: f64) -> Result<TilePlan> {
        let band = Self::latitude_band(latitude);
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(plan) = plans.get(&band) {
            return Ok(*plan);
        }

        let plan = plan_tile(
            self.band_count,
            self.scale_m,
            self.byte_limit,
            self.bytes_per_band,
            self.safety_margin,
            band as f64,
        )?;
        tracing::debug!(
            latitude_band = band,
            pixels_per_side = plan.pixels_per_side,
            width_deg = plan.width_deg,
            height_deg = plan.height_deg,
            "Planned tile size"
        );
        plans.insert(band, plan);
        Ok(plan)
    }

    /// Plan for a region, sized for its equator-most latitude
    pub fn plan_for_bounds(&self, bounds: &Bounds) -> Result<TilePlan> {
        self.plan_for_latitude(bounds.min_abs_latitude())
    }

    /// Number of latitude bands planned so far
    pub fn cached_bands(&self) -> usize {
        self.plans.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
