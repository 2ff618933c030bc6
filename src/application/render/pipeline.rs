//! Request orchestration: validate, consult the cache, render under limits,
//! cache the result and, for reference deliveries, persist it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::controller::{ControllerError, RenderController};
use super::engine::EngineError;
use super::fingerprint::Fingerprint;
use super::types::{InvalidRequest, OutputFormat, RenderRequest, RenderResult};
use crate::cache::RenderCache;
use crate::infra::storage::{ChartStorage, StorageError, StorageTarget};

const SOURCE: &str = "application::render::pipeline";

/// How the caller wants the chart back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The encoded bytes; storage is never written.
    Inline,
    /// A durable reference; the chart is persisted.
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    CacheLookup,
    Rendering,
    Caching,
    Persisting,
    Responding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::CacheLookup => "cache_lookup",
            Stage::Rendering => "rendering",
            Stage::Caching => "caching",
            Stage::Persisting => "persisting",
            Stage::Responding => "responding",
        }
    }
}

/// Loosely typed request fields as received from a client.
#[derive(Debug, Clone, Default)]
pub struct RenderDraft {
    pub spec: Option<Value>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Inline {
        result: RenderResult,
        format: OutputFormat,
        cache_hit: bool,
    },
    Reference {
        target: StorageTarget,
        cache_hit: bool,
    },
}

impl RenderOutcome {
    pub fn cache_hit(&self) -> bool {
        match self {
            RenderOutcome::Inline { cache_hit, .. }
            | RenderOutcome::Reference { cache_hit, .. } => *cache_hit,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] InvalidRequest),
    #[error("render timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("render engine failed: {0}")]
    Engine(#[source] EngineError),
    #[error("failed to persist chart: {0}")]
    Persist(#[source] StorageError),
    #[error("render capacity exhausted: {0}")]
    Capacity(#[source] ControllerError),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Engine(_) => "engine",
            PipelineError::Persist(_) => "persist",
            PipelineError::Capacity(_) => "capacity",
        }
    }
}

impl From<ControllerError> for PipelineError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Timeout { timeout } => PipelineError::Timeout(timeout),
            ControllerError::Engine(err) => PipelineError::Engine(err),
            other @ (ControllerError::Capacity { .. } | ControllerError::Closed) => {
                PipelineError::Capacity(other)
            }
        }
    }
}

pub struct RenderPipeline {
    cache: Option<Arc<RenderCache>>,
    controller: Arc<RenderController>,
    storage: Arc<ChartStorage>,
}

impl RenderPipeline {
    /// `cache` is `None` when caching is disabled.
    pub fn new(
        cache: Option<Arc<RenderCache>>,
        controller: Arc<RenderController>,
        storage: Arc<ChartStorage>,
    ) -> Self {
        Self {
            cache,
            controller,
            storage,
        }
    }

    pub fn cache(&self) -> Option<&Arc<RenderCache>> {
        self.cache.as_ref()
    }

    pub fn controller(&self) -> &Arc<RenderController> {
        &self.controller
    }

    pub fn storage(&self) -> &Arc<ChartStorage> {
        &self.storage
    }

    /// Validate `draft` and run it through the pipeline.
    pub async fn execute(
        &self,
        draft: RenderDraft,
        delivery: Delivery,
    ) -> Result<RenderOutcome, PipelineError> {
        let request = RenderRequest::from_parts(
            draft.spec,
            draft.width,
            draft.height,
            draft.format.as_deref(),
        )
        .inspect_err(|err| {
            debug!(
                target_module = SOURCE,
                op = "execute",
                stage = Stage::Validating.as_str(),
                result = "rejected",
                error = %err,
                "Render request rejected"
            );
        })?;
        self.execute_request(&request, delivery).await
    }

    pub async fn execute_request(
        &self,
        request: &RenderRequest,
        delivery: Delivery,
    ) -> Result<RenderOutcome, PipelineError> {
        let started_at = Instant::now();
        let fingerprint = Fingerprint::of(request);

        let mut stage = Stage::CacheLookup;
        let outcome = self
            .run(request, &fingerprint, delivery, &mut stage)
            .await;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &outcome {
            Ok(outcome) => info!(
                target_module = SOURCE,
                op = "execute",
                result = "ok",
                fingerprint = fingerprint.short(),
                format = request.format().as_str(),
                cache_hit = outcome.cache_hit(),
                delivery = ?delivery,
                elapsed_ms,
                "Chart rendered"
            ),
            Err(err) => warn!(
                target_module = SOURCE,
                op = "execute",
                result = "error",
                fingerprint = fingerprint.short(),
                stage = stage.as_str(),
                error_kind = err.kind(),
                error = %err,
                elapsed_ms,
                "Chart render failed"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        request: &RenderRequest,
        fingerprint: &Fingerprint,
        delivery: Delivery,
        stage: &mut Stage,
    ) -> Result<RenderOutcome, PipelineError> {
        let cached = self.cache.as_ref().and_then(|cache| cache.lookup(fingerprint));
        let cache_hit = cached.is_some();

        let result = match cached {
            Some(result) => result,
            None => {
                *stage = Stage::Rendering;
                let result = self.controller.render_with_limits(request).await?;

                *stage = Stage::Caching;
                if let Some(cache) = &self.cache {
                    cache.store(fingerprint.clone(), result.clone());
                }
                result
            }
        };

        let outcome = match delivery {
            Delivery::Inline => RenderOutcome::Inline {
                result,
                format: request.format(),
                cache_hit,
            },
            Delivery::Reference => {
                *stage = Stage::Persisting;
                let filename = chart_filename(request);
                let target = self
                    .storage
                    .persist(&result, &filename)
                    .await
                    .map_err(PipelineError::Persist)?;
                RenderOutcome::Reference { target, cache_hit }
            }
        };

        *stage = Stage::Responding;
        Ok(outcome)
    }
}

/// Unique per render, independent of the fingerprint.
fn chart_filename(request: &RenderRequest) -> String {
    format!("chart-{}.{}", Uuid::new_v4(), request.format().extension())
}
