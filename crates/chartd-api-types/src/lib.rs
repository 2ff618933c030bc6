//! Wire types for the chartd HTTP API.
//!
//! Field names follow the JSON conventions of existing chart-rendering clients
//! (`resultObj`, `errorMessage`, ...), hence the camelCase renames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the caller wants the rendered chart delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Return the encoded chart in the response body.
    #[default]
    Inline,
    /// Persist the chart and return an addressable URL.
    Url,
}

/// Body accepted by `POST /api/render`.
///
/// Dimensions are signed so that non-positive values reach validation and get a
/// descriptive error instead of a deserialisation failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderRequestBody {
    #[serde(default)]
    pub spec: Option<Value>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub output: Option<OutputMode>,
}

/// Active persistence backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    S3,
    Local,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::S3 => "s3",
            StorageMode::Local => "local",
        }
    }
}

/// Successful envelope for JSON and reference-producing responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEnvelope {
    pub success: bool,
    pub result_obj: Value,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
}

/// Failure envelope returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error_kind: String,
    pub error_message: String,
    /// Error source chain; only populated when the server runs with debug errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Vec<String>>,
}

/// Non-secret object storage settings echoed by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ConfigSummary {
    pub region: String,
    pub bucket: String,
    pub custom_domain: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub enabled: bool,
    pub entries: usize,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderHealth {
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub in_flight: usize,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub storage: StorageMode,
    pub s3_config: Option<S3ConfigSummary>,
    pub cache: CacheHealth,
    pub render: RenderHealth,
}
