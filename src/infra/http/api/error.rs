use crate::application::error::{ErrorReport, error_chain};
use crate::application::render::PipelineError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chartd_api_types::ErrorEnvelope;

pub mod codes {
    pub const VALIDATION: &str = "validation";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const PAYLOAD: &str = "payload";
}

/// Seconds a client is told to wait when every render slot is taken.
const CAPACITY_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    detail: Option<Vec<String>>,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        let report = ErrorReport::from_message("infra::http::api", status, message.clone());
        Self {
            status,
            kind,
            message,
            detail: None,
            retry_after: None,
            report,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Valid API key required",
        )
    }

    /// Map a body that failed to parse as JSON.
    pub fn payload(rejection: &JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        let mut error = Self::new(status, codes::PAYLOAD, rejection.body_text());
        error.report = ErrorReport::from_error("infra::http::api::payload", status, rejection);
        error
    }

    /// Map a pipeline failure; `debug` exposes the error source chain in the body.
    pub fn from_pipeline(err: &PipelineError, debug: bool) -> Self {
        let status = match err {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Timeout(_) | PipelineError::Engine(_) | PipelineError::Persist(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let retry_after =
            matches!(err, PipelineError::Capacity(_)).then_some(CAPACITY_RETRY_AFTER_SECS);

        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            detail: debug.then(|| error_chain(err)),
            retry_after,
            report: ErrorReport::from_error("infra::http::api::pipeline", status, err),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Too many requests, please try again later",
        );
        error.retry_after = Some(retry_after);
        error.report = ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        );
        error.into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            success: false,
            error_kind: self.kind.to_string(),
            error_message: self.message,
            detail: self.detail,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        self.report.attach(&mut response);
        response
    }
}
