use std::io;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::types::{RenderOptions, RenderResult};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("render engine failed (exit {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("render engine unavailable: {0}")]
    Unavailable(#[source] io::Error),
    #[error("render engine produced no output")]
    EmptyOutput,
    #[error("render engine i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("render engine rejected the spec: {0}")]
    Rejected(String),
    #[error("render task aborted: {0}")]
    Aborted(String),
}

/// The drawing collaborator. Implementations turn a chart spec into encoded
/// bytes; they may fail on malformed specs.
#[async_trait]
pub trait ChartEngine: Send + Sync {
    async fn render(&self, spec: &Value, options: RenderOptions)
    -> Result<RenderResult, EngineError>;
}
