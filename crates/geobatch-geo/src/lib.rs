//! GeoBatch Geo - Geometry measurement, validation, and request transforms
//!
//! This crate bridges the canonical geometry model to the `geo` crate and
//! provides the per-plot measurements the engine needs before any network
//! activity: geodesic area, vertex counts, validity, and the workload profile.

pub mod models;
pub mod obfuscation;
pub mod profile;
pub mod validation;

pub use models::{to_geo_geometry, GeometryExt};
pub use obfuscation::{
    DecoyTransform, GeometryTransform, IdentityTransform, TileRegion, DECOY_PREFIX,
};
pub use profile::{feature_kind, profile_plots};
pub use validation::{validate_geometry, validate_plot, ValidationError, ValidationResult};
