//! Admission and deadline control around the render engine.
//!
//! At most `concurrency` engine calls run at once. Each admitted call runs on
//! its own task and is raced against the configured timeout. When the timer
//! wins, the engine task is aborted and awaited before the admission slot is
//! freed, so a cancellable engine (such as one that kills its child process on
//! drop) never outlives its slot. A caller dropped mid-render aborts the task
//! as well. The admission permit is owned by the call and released once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::{ChartEngine, EngineError};
use super::types::{RenderRequest, RenderResult};

const SOURCE: &str = "application::render::controller";

pub(crate) const METRIC_RENDER_IN_FLIGHT: &str = "chartd_render_in_flight";
pub(crate) const METRIC_RENDER_TIMEOUT: &str = "chartd_render_timeout_total";
pub(crate) const METRIC_RENDER_REJECTED: &str = "chartd_render_rejected_total";
pub(crate) const METRIC_RENDER_MS: &str = "chartd_render_ms";

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Waiters allowed beyond the in-flight limit. `None` queues without bound.
    pub max_queue: Option<usize>,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_queue: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("render timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("render queue is full ({waiting} waiting, limit {max_queue})")]
    Capacity { waiting: usize, max_queue: usize },
    #[error("render controller is shutting down")]
    Closed,
}

pub struct RenderController {
    engine: Arc<dyn ChartEngine>,
    permits: Arc<Semaphore>,
    limits: RenderLimits,
    waiting: AtomicUsize,
}

impl RenderController {
    pub fn new(engine: Arc<dyn ChartEngine>, limits: RenderLimits) -> Self {
        let limits = RenderLimits {
            concurrency: limits.concurrency.max(1),
            ..limits
        };
        Self {
            engine,
            permits: Arc::new(Semaphore::new(limits.concurrency)),
            limits,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn limits(&self) -> RenderLimits {
        self.limits
    }

    /// Engine calls currently holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.limits
            .concurrency
            .saturating_sub(self.permits.available_permits())
    }

    /// Callers waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Stop admitting new renders. Calls already admitted run to completion.
    pub fn close(&self) {
        self.permits.close();
    }

    pub async fn render_with_limits(
        &self,
        request: &RenderRequest,
    ) -> Result<RenderResult, ControllerError> {
        let permit = self.admit().await?;
        gauge!(METRIC_RENDER_IN_FLIGHT).set(self.in_flight() as f64);

        let started_at = Instant::now();
        let engine = Arc::clone(&self.engine);
        let spec = request.spec().clone();
        let options = request.options();
        let mut task = EngineTask(tokio::spawn(async move {
            engine.render(&spec, options).await
        }));

        let outcome = match tokio::time::timeout(self.limits.timeout, &mut task.0).await {
            Ok(Ok(rendered)) => rendered.map_err(ControllerError::from),
            Ok(Err(join_err)) => Err(ControllerError::Engine(EngineError::Aborted(
                join_err.to_string(),
            ))),
            Err(_) => {
                // Wait for the engine future to be dropped before the slot frees up.
                task.0.abort();
                let _ = (&mut task.0).await;
                counter!(METRIC_RENDER_TIMEOUT).increment(1);
                warn!(
                    target_module = SOURCE,
                    op = "render_with_limits",
                    result = "timeout",
                    timeout_ms = self.limits.timeout.as_millis() as u64,
                    "Render deadline exceeded; engine call cancelled"
                );
                Err(ControllerError::Timeout {
                    timeout: self.limits.timeout,
                })
            }
        };

        drop(permit);
        gauge!(METRIC_RENDER_IN_FLIGHT).set(self.in_flight() as f64);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        let result = match &outcome {
            Ok(_) => "ok",
            Err(ControllerError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        histogram!(METRIC_RENDER_MS, "result" => result).record(elapsed_ms as f64);
        if let Err(ControllerError::Engine(err)) = &outcome {
            warn!(
                target_module = SOURCE,
                op = "render_with_limits",
                result,
                elapsed_ms,
                error = %err,
                "Render engine call failed"
            );
        } else {
            debug!(
                target_module = SOURCE,
                op = "render_with_limits",
                result,
                elapsed_ms,
                "Render engine call finished"
            );
        }

        outcome
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, ControllerError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(ControllerError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let waiter = Waiter::enter(&self.waiting);
        if let Some(max_queue) = self.limits.max_queue
            && waiter.position > max_queue
        {
            counter!(METRIC_RENDER_REJECTED).increment(1);
            warn!(
                target_module = SOURCE,
                op = "admit",
                result = "rejected",
                waiting = waiter.position,
                max_queue,
                "Render queue full"
            );
            return Err(ControllerError::Capacity {
                waiting: waiter.position,
                max_queue,
            });
        }

        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ControllerError::Closed)
    }
}

/// Aborts the spawned engine call when the caller goes away.
struct EngineTask(JoinHandle<Result<RenderResult, EngineError>>);

impl Drop for EngineTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Counts a caller in the wait queue for as long as it is alive.
struct Waiter<'a> {
    counter: &'a AtomicUsize,
    position: usize,
}

impl<'a> Waiter<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let position = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Self { counter, position }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
