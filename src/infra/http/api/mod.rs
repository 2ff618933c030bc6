pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod state;

pub use state::{ApiKeyGuard, ApiState};

use axum::{Router, middleware as axum_middleware, routing::post};

use crate::infra::http::RouterState;
use crate::infra::http::middleware::log_responses;

pub fn build_api_router(state: RouterState) -> Router<RouterState> {
    let auth_state = state.clone();
    let rate_state = state.clone();

    Router::new()
        .route("/api/render", post(handlers::render_chart))
        .route("/api/chart/render", post(handlers::render_chart))
        .route("/api/gpt-vis", post(handlers::render_gpt_vis))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::api_auth,
        ))
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ))
        .layer(axum_middleware::from_fn(log_responses))
}
