use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use chartd_api_types::{CacheHealth, HealthResponse, RenderHealth};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::error;

use crate::{
    application::{error::HttpError, render::RenderPipeline},
    infra::storage::StorageError,
};

use super::{RouterState, middleware::log_responses};

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<RenderPipeline>,
}

pub fn build_router(state: RouterState) -> Router<RouterState> {
    let images_route = format!("{}/{{file}}", state.http.pipeline.storage().local().public_path());

    Router::new()
        .route("/health", get(health))
        .route(&images_route, get(serve_image))
        .fallback(endpoint_not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
}

async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    let pipeline = &state.pipeline;
    let storage = pipeline.storage();
    let controller = pipeline.controller();
    let limits = controller.limits();

    let cache = match pipeline.cache() {
        Some(cache) => CacheHealth {
            enabled: true,
            entries: cache.len(),
            ttl_ms: cache.ttl().as_millis() as u64,
            max_entries: cache.max_entries(),
        },
        None => CacheHealth {
            enabled: false,
            entries: 0,
            ttl_ms: 0,
            max_entries: 0,
        },
    };

    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: storage.mode(),
        s3_config: storage.object_summary(),
        cache,
        render: RenderHealth {
            concurrency: limits.concurrency,
            timeout_ms: limits.timeout.as_millis() as u64,
            in_flight: controller.in_flight(),
        },
    })
}

async fn serve_image(State(state): State<HttpState>, Path(file): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_image";

    match state.pipeline.storage().local().read(&file).await {
        Ok(bytes) => build_image_response(&file, bytes),
        Err(StorageError::InvalidFilename(_) | StorageError::NotFound(_)) => {
            HttpError::not_found(SOURCE, "Chart not found").into_response()
        }
        Err(err) => {
            error!(
                target = SOURCE,
                file = %file,
                error = %err,
                "failed to read stored chart"
            );
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Failed to read stored chart",
                &err,
            )
            .into_response()
        }
    }
}

fn build_image_response(file: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(file).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    // Filenames are unique per render, so stored charts never change.
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}

async fn endpoint_not_found() -> Response {
    HttpError::not_found("infra::http::public::fallback", "Endpoint not found").into_response()
}
