use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::error::ApiError;
use super::rate_limit::RateDecision;
use super::state::ApiState;

const API_KEY_HEADER: &str = "x-api-key";
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn api_auth(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.api_key.is_enabled() {
        return next.run(request).await;
    }

    match extract_token(request.headers()) {
        Some(token) if state.api_key.verify(token) => next.run(request).await,
        _ => ApiError::unauthorized().into_response(),
    }
}

pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request);

    let remaining = match state.rate_limiter.check(&client) {
        RateDecision::Allowed { remaining } => remaining,
        RateDecision::Limited { retry_after_secs } => {
            debug!(
                target = "chartd::api::ratelimit",
                client = %client,
                retry_after_secs,
                "client exceeded rate limit"
            );
            return ApiError::rate_limited(retry_after_secs);
        }
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(state.rate_limiter.limit()));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    response
}

fn client_key(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "));
    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
    })
}
