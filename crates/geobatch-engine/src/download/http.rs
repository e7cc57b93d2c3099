use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::layers::RasterExpression;
use geobatch_core::models::{PartialTable, Plot};
use geobatch_core::ports::{ExportHandle, ExportRequest, RasterPayload, RemoteService};

/// Property name plot ids travel under in reduction requests
const ID_PROPERTY: &str = "feature_id";

/// HTTP client for the remote compute service
///
/// Endpoints: `POST {base}/v1/exports` returns an [`ExportHandle`],
/// `GET {handle.url}` returns the raster, and `POST {base}/v1/reductions`
/// returns a [`PartialTable`].
pub struct HttpRemoteService {
    /// Base URL of the service API (e.g., "https://compute.example.org")
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpRemoteService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn error_from_response(response: reqwest::Response) -> GeobatchError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if let Some((requested, limit)) = parse_payload_limit(&body) {
            return GeobatchError::PayloadTooLarge { requested, limit };
        }
        if status == 413 {
            return GeobatchError::PayloadTooLarge { requested: 0, limit: 0 };
        }
        GeobatchError::Service { status: Some(status), message: body.chars().take(500).collect() }
    }
}

fn transport_error(e: reqwest::Error) -> GeobatchError {
    if e.is_timeout() {
        return GeobatchError::Timeout { seconds: 0 };
    }
    GeobatchError::Service {
        status: e.status().map(|s| s.as_u16()),
        message: format!("Failed to reach remote service: {}", e),
    }
}

fn payload_limit_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)\((\d+)\s*bytes\)\s*must be less than or equal to\s*(\d+)\s*bytes").ok()
        })
        .as_ref()
}

/// Extract `(requested, limit)` from a payload ceiling message
pub fn parse_payload_limit(message: &str) -> Option<(u64, u64)> {
    let captures = payload_limit_pattern()?.captures(message)?;
    let requested = captures.get(1)?.as_str().parse().ok()?;
    let limit = captures.get(2)?.as_str().parse().ok()?;
    Some((requested, limit))
}

#[derive(Debug, Serialize)]
struct ReductionRequest<'a> {
    expression: &'a RasterExpression,
    features: Vec<serde_json::Value>,
    id_property: &'a str,
    scale_m: f64,
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn request_export(&self, request: &ExportRequest) -> Result<ExportHandle> {
        let response = self
            .client
            .post(format!("{}/v1/exports", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<ExportHandle>().await.map_err(|e| GeobatchError::Service {
            status: None,
            message: format!("Failed to parse export handle: {}", e),
        })
    }

    async fn fetch(&self, handle: &ExportHandle) -> Result<RasterPayload> {
        let response = self.client.get(&handle.url).send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport_error)?.to_vec();

        Ok(RasterPayload { status, content_type, bytes })
    }

    async fn reduce_regions(
        &self,
        expression: &RasterExpression,
        plots: &[Plot],
        scale_m: f64,
    ) -> Result<PartialTable> {
        let body = ReductionRequest {
            expression,
            features: plots.iter().map(|p| p.to_geojson_feature(ID_PROPERTY)).collect(),
            id_property: ID_PROPERTY,
            scale_m,
        };

        let response = self
            .client
            .post(format!("{}/v1/reductions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<PartialTable>().await.map_err(|e| GeobatchError::InvalidPayload {
            reason: format!("Failed to parse reduction table: {}", e),
        })
    }
}
