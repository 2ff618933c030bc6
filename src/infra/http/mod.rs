pub mod api;
mod middleware;
mod public;

pub use api::rate_limit::ApiRateLimiter;
pub use api::{ApiKeyGuard, ApiState, build_api_router};
pub use public::HttpState;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::application::render::RenderPipeline;
use crate::config::{SecuritySettings, ServerSettings};

#[derive(Clone)]
pub struct RouterState {
    pub http: HttpState,
    pub api: ApiState,
}

impl RouterState {
    pub fn new(
        pipeline: Arc<RenderPipeline>,
        server: &ServerSettings,
        security: &SecuritySettings,
    ) -> Self {
        let rate_limiter = ApiRateLimiter::new(
            Duration::from_secs(u64::from(security.rate_limit_window_seconds.get())),
            security.rate_limit_max_requests.get(),
        );
        Self {
            http: HttpState {
                pipeline: pipeline.clone(),
            },
            api: ApiState {
                pipeline,
                rate_limiter: Arc::new(rate_limiter),
                api_key: ApiKeyGuard::new(security.api_key.as_deref()),
                debug_errors: server.debug_errors,
            },
        }
    }
}

impl FromRef<RouterState> for HttpState {
    fn from_ref(state: &RouterState) -> Self {
        state.http.clone()
    }
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

/// The complete service: public routes, render API, CORS and the body limit.
pub fn build_router(state: RouterState, security: &SecuritySettings) -> Router {
    public::build_router(state.clone())
        .merge(build_api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(security.max_body_bytes.get()))
        .layer(cors_layer(&security.allowed_origins))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    target = "chartd::http::cors",
                    origin = %origin,
                    error = %err,
                    "ignoring invalid CORS origin"
                );
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
