use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Encodings the render engine can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Svg,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Svg => "svg",
            OutputFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            other => other.as_str(),
        }
    }

    /// Whether the payload is an image rather than a structured document.
    pub fn is_image(&self) -> bool {
        !matches!(self, OutputFormat::Json)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported output format `{0}`")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            "svg" => Ok(OutputFormat::Svg),
            "json" => Ok(OutputFormat::Json),
            _ => Err(UnknownFormat(value.to_string())),
        }
    }
}

/// Rendering parameters that accompany the spec when calling the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            format: OutputFormat::Png,
        }
    }
}

/// A validated render request. Construction goes through [`RenderRequest::new`],
/// so holders can rely on `spec` being a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    spec: Value,
    options: RenderOptions,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("Missing required parameter: spec")]
    MissingSpec,
    #[error("spec must be a JSON object")]
    SpecNotObject,
    #[error("{field} must be a positive integer, got {value}")]
    Dimension { field: &'static str, value: i64 },
    #[error(transparent)]
    Format(#[from] UnknownFormat),
}

impl RenderRequest {
    pub fn new(spec: Value, options: RenderOptions) -> Result<Self, InvalidRequest> {
        if !spec.is_object() {
            return Err(InvalidRequest::SpecNotObject);
        }
        Ok(Self { spec, options })
    }

    /// Build a request from loosely-typed client input, applying defaults.
    pub fn from_parts(
        spec: Option<Value>,
        width: Option<i64>,
        height: Option<i64>,
        format: Option<&str>,
    ) -> Result<Self, InvalidRequest> {
        let spec = match spec {
            None | Some(Value::Null) => return Err(InvalidRequest::MissingSpec),
            Some(spec) => spec,
        };
        let width = dimension("width", width, DEFAULT_WIDTH)?;
        let height = dimension("height", height, DEFAULT_HEIGHT)?;
        let format = match format {
            Some(raw) => raw.parse::<OutputFormat>()?,
            None => OutputFormat::default(),
        };

        Self::new(
            spec,
            RenderOptions {
                width,
                height,
                format,
            },
        )
    }

    pub fn spec(&self) -> &Value {
        &self.spec
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn format(&self) -> OutputFormat {
        self.options.format
    }
}

fn dimension(field: &'static str, value: Option<i64>, default: u32) -> Result<u32, InvalidRequest> {
    match value {
        None => Ok(default),
        Some(value) => u32::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or(InvalidRequest::Dimension { field, value }),
    }
}

/// Engine output: an encoded chart plus its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub payload: Bytes,
    pub content_type: String,
}

impl RenderResult {
    pub fn new(payload: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
