//! Error types for GeoBatch

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeobatchError {
    // Remote service errors
    #[error("Remote service error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Service { status: Option<u16>, message: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Payload too large: {requested} bytes requested, limit is {limit} bytes")]
    PayloadTooLarge { requested: u64, limit: u64 },

    #[error("Invalid raster payload: {reason}")]
    InvalidPayload { reason: String },

    // Geometry errors
    #[error("Invalid geometry at feature {feature_id}: {reason}")]
    InvalidGeometry { feature_id: String, reason: String },

    #[error("Tile plan infeasible: one pixel of {band_count} bands needs {bytes_per_pixel} bytes, budget is {max_bytes} bytes")]
    TilePlanInfeasible {
        band_count: u32,
        bytes_per_pixel: u64,
        max_bytes: f64,
    },

    // Batch-wide structural errors
    #[error("No usable tiles found in {dir}")]
    MosaicEmpty { dir: PathBuf },

    #[error("Duplicate feature id {feature_id} in batch")]
    DuplicateFeatureId { feature_id: String },

    #[error("Batch cancelled")]
    Cancelled,

    // Raster decoding errors
    #[error("Raster error in {path}: {reason}")]
    Raster { path: PathBuf, reason: String },

    // Input format errors
    #[error("{format} format error: {reason}")]
    Format { format: String, reason: String },

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GeobatchError {
    /// Whether a download attempt that failed with this error may be retried
    /// with the same request.
    ///
    /// Client errors other than 408 and 429 are permanent: the same request
    /// gets the same rejection.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeobatchError::Service { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429 || *code == 408,
            },
            GeobatchError::Timeout { .. } => true,
            GeobatchError::InvalidPayload { .. } => true,
            GeobatchError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether this error means the tile must be shrunk before asking again.
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, GeobatchError::PayloadTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, GeobatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GeobatchError::Service { status: Some(500), message: "boom".into() }.is_retryable());
        assert!(GeobatchError::Service { status: Some(503), message: "busy".into() }.is_retryable());
        assert!(GeobatchError::Service { status: Some(429), message: "slow down".into() }.is_retryable());
        assert!(GeobatchError::Service { status: None, message: "reset".into() }.is_retryable());
        assert!(GeobatchError::Timeout { seconds: 30 }.is_retryable());
        assert!(GeobatchError::InvalidPayload { reason: "truncated".into() }.is_retryable());

        assert!(GeobatchError::Service { status: Some(408), message: "slow client".into() }.is_retryable());

        for status in [400, 401, 403, 404, 413] {
            assert!(!GeobatchError::Service { status: Some(status), message: "rejected".into() }.is_retryable());
        }
        assert!(!GeobatchError::PayloadTooLarge { requested: 10, limit: 5 }.is_retryable());
        assert!(!GeobatchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_service_error_display() {
        let err = GeobatchError::Service { status: Some(500), message: "internal".into() };
        assert_eq!(err.to_string(), "Remote service error (HTTP 500): internal");

        let err = GeobatchError::Service { status: None, message: "connection reset".into() };
        assert_eq!(err.to_string(), "Remote service error: connection reset");
    }
}
