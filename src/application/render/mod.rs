//! Chart rendering.
//!
//! A [`RenderPipeline`] ties together the render cache, the admission and
//! deadline controller in front of the [`ChartEngine`], and chart storage.
//! Components are built once at startup and shared through `Arc`s.

mod controller;
mod engine;
mod fingerprint;
mod pipeline;
mod types;

pub use controller::{
    ControllerError, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, RenderController, RenderLimits,
};
pub use engine::{ChartEngine, EngineError};
pub use fingerprint::Fingerprint;
pub use pipeline::{
    Delivery, PipelineError, RenderDraft, RenderOutcome, RenderPipeline, Stage,
};
pub use types::{
    DEFAULT_HEIGHT, DEFAULT_WIDTH, InvalidRequest, OutputFormat, RenderOptions, RenderRequest,
    RenderResult, UnknownFormat,
};

pub(crate) use controller::{
    METRIC_RENDER_IN_FLIGHT, METRIC_RENDER_MS, METRIC_RENDER_REJECTED, METRIC_RENDER_TIMEOUT,
};
