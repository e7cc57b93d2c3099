use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::RasterExpression;
use crate::models::{Geometry, PartialTable, Plot};

/// Output format requested for raster exports
pub const GEOTIFF_FORMAT: &str = "GEO_TIFF";

/// Request for a clipped raster extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub expression: RasterExpression,
    /// Clip region, a rectangle in `crs` coordinates
    pub region: Geometry,
    pub scale_m: f64,
    pub crs: String,
    pub format: String,
}

/// Handle to a prepared export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportHandle {
    pub url: String,
}

/// Raw response of a transfer, validated by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPayload {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl RasterPayload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Port for the remote compute service
///
/// The service owns all raster algebra; the engine only asks for clipped
/// extracts or for a server-side reduction over a set of plots.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Prepare an export of `request.expression` clipped to `request.region`
    ///
    /// Fails with `PayloadTooLarge` when the extract would exceed the
    /// service's byte ceiling.
    async fn request_export(&self, request: &ExportRequest) -> Result<ExportHandle>;

    /// Transfer the bytes behind a handle
    async fn fetch(&self, handle: &ExportHandle) -> Result<RasterPayload>;

    /// Reduce the expression over the plots on the service side
    ///
    /// Returns one row per plot the service could reduce.
    async fn reduce_regions(
        &self,
        expression: &RasterExpression,
        plots: &[Plot],
        scale_m: f64,
    ) -> Result<PartialTable>;
}
