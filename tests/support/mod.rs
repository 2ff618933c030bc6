#![allow(dead_code)]

use std::net::SocketAddr;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, Response, header};
use chartd::application::render::{
    ChartEngine, EngineError, RenderController, RenderLimits, RenderOptions, RenderPipeline,
    RenderResult,
};
use chartd::cache::{CacheConfig, RenderCache};
use chartd::config::{SecuritySettings, ServerSettings};
use chartd::infra::http::{RouterState, build_router};
use chartd::infra::storage::{ChartStorage, DEFAULT_PUBLIC_PATH, LocalStorage};
use serde_json::Value;
use tempfile::TempDir;

/// Deterministic engine: output depends only on its input.
#[derive(Default)]
pub struct StubEngine {
    calls: AtomicUsize,
    last_spec: Mutex<Option<Value>>,
    fail: bool,
}

impl StubEngine {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<Value> {
        self.last_spec.lock().expect("spec lock").clone()
    }
}

#[async_trait]
impl ChartEngine for StubEngine {
    async fn render(
        &self,
        spec: &Value,
        options: RenderOptions,
    ) -> Result<RenderResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_spec.lock().expect("spec lock") = Some(spec.clone());
        if self.fail {
            return Err(EngineError::Rejected("unknown chart type".to_string()));
        }
        let payload = if options.format.is_image() {
            format!("{}:{}x{}:{spec}", options.format, options.width, options.height).into_bytes()
        } else {
            serde_json::to_vec(&serde_json::json!({"spec": spec, "width": options.width}))
                .expect("serialize")
        };
        Ok(RenderResult::new(payload, options.format.content_type()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<StubEngine>,
    pub pipeline: Arc<RenderPipeline>,
    pub images: TempDir,
}

pub struct AppOptions {
    pub engine: StubEngine,
    pub cache_enabled: bool,
    pub api_key: Option<String>,
    pub rate_limit_max_requests: u32,
    pub max_body_bytes: usize,
    pub debug_errors: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            engine: StubEngine::default(),
            cache_enabled: true,
            api_key: None,
            rate_limit_max_requests: 100,
            max_body_bytes: 10 * 1024 * 1024,
            debug_errors: false,
        }
    }
}

pub fn app() -> TestApp {
    app_with(AppOptions::default())
}

pub fn app_with(options: AppOptions) -> TestApp {
    let engine = Arc::new(options.engine);
    let controller = Arc::new(RenderController::new(
        engine.clone(),
        RenderLimits::default(),
    ));
    let images = TempDir::new().expect("temp dir");
    let storage = Arc::new(ChartStorage::local_only(LocalStorage::new(
        images.path(),
        DEFAULT_PUBLIC_PATH,
    )));
    let cache = options
        .cache_enabled
        .then(|| Arc::new(RenderCache::new(&CacheConfig::default())));
    let pipeline = Arc::new(RenderPipeline::new(cache, controller, storage));

    let server = ServerSettings {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        graceful_shutdown: Duration::from_secs(1),
        debug_errors: options.debug_errors,
    };
    let security = SecuritySettings {
        api_key: options.api_key,
        allowed_origins: vec!["*".to_string()],
        rate_limit_window_seconds: NonZeroU32::new(900).expect("non-zero"),
        rate_limit_max_requests: NonZeroU32::new(options.rate_limit_max_requests)
            .expect("non-zero"),
        max_body_bytes: NonZeroUsize::new(options.max_body_bytes).expect("non-zero"),
    };

    let state = RouterState::new(pipeline.clone(), &server, &security);
    TestApp {
        router: build_router(state, &security),
        engine,
        pipeline,
        images,
    }
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
