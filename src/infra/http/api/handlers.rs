use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chartd_api_types::{OutputMode, RenderEnvelope, RenderRequestBody};
use serde_json::{Map, Value};

use crate::application::render::{Delivery, RenderDraft, RenderOutcome, RenderResult};
use crate::infra::storage::StorageTarget;

use super::error::ApiError;
use super::state::ApiState;

const SUCCESS_MESSAGE: &str = "Chart generated successfully";
const CACHE_HEADER: &str = "x-chartd-cache";
/// Tag added to every spec submitted through the plugin-compatible route.
const GPT_VIS_SOURCE: &str = "dify-plugin-visualization";

/// `POST /api/render`: explicit spec plus options.
pub async fn render_chart(
    State(state): State<ApiState>,
    payload: Result<Json<RenderRequestBody>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return ApiError::payload(&rejection).into_response(),
    };

    let delivery = match body.output.unwrap_or_default() {
        OutputMode::Inline => Delivery::Inline,
        OutputMode::Url => Delivery::Reference,
    };
    let draft = RenderDraft {
        spec: body.spec,
        width: body.width,
        height: body.height,
        format: body.format,
    };

    match state.pipeline.execute(draft, delivery).await {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => ApiError::from_pipeline(&err, state.debug_errors).into_response(),
    }
}

/// `POST /api/gpt-vis`: the body is the chart spec; the chart is always persisted.
pub async fn render_gpt_vis(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return ApiError::payload(&rejection).into_response(),
    };

    let draft = match gpt_vis_draft(body) {
        Ok(draft) => draft,
        Err(err) => return err.into_response(),
    };

    match state.pipeline.execute(draft, Delivery::Reference).await {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => ApiError::from_pipeline(&err, state.debug_errors).into_response(),
    }
}

fn gpt_vis_draft(body: Value) -> Result<RenderDraft, ApiError> {
    let Value::Object(mut options) = body else {
        return Err(ApiError::bad_request("Invalid options provided"));
    };

    let width = dimension(&options, "width")?;
    let height = dimension(&options, "height")?;
    let format = match options.get("format") {
        None | Some(Value::Null) => None,
        Some(Value::String(format)) => Some(format.clone()),
        Some(_) => return Err(ApiError::bad_request("format must be a string")),
    };
    options.insert(
        "source".to_string(),
        Value::String(GPT_VIS_SOURCE.to_string()),
    );

    Ok(RenderDraft {
        spec: Some(Value::Object(options)),
        width,
        height,
        format,
    })
}

fn dimension(options: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, ApiError> {
    match options.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("{field} must be a positive integer"))),
    }
}

fn outcome_response(outcome: RenderOutcome) -> Response {
    let cache_hit = outcome.cache_hit();
    let mut response = match outcome {
        RenderOutcome::Inline { result, format, .. } if format.is_image() => image_response(result),
        RenderOutcome::Inline { result, .. } => Json(RenderEnvelope {
            success: true,
            result_obj: document(&result),
            message: SUCCESS_MESSAGE.to_string(),
            storage: None,
            local_path: None,
            cache_hit,
        })
        .into_response(),
        RenderOutcome::Reference { target, .. } => {
            Json(reference_envelope(&target, cache_hit)).into_response()
        }
    };

    response.headers_mut().insert(
        CACHE_HEADER,
        HeaderValue::from_static(if cache_hit { "hit" } else { "miss" }),
    );
    response
}

fn image_response(result: RenderResult) -> Response {
    let mut response = Response::new(Body::from(result.payload));
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&result.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Engine JSON output; payloads that are not valid JSON are passed through as text.
fn document(result: &RenderResult) -> Value {
    serde_json::from_slice(&result.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&result.payload).into_owned()))
}

fn reference_envelope(target: &StorageTarget, cache_hit: bool) -> RenderEnvelope {
    RenderEnvelope {
        success: true,
        result_obj: Value::String(target.url().to_string()),
        message: SUCCESS_MESSAGE.to_string(),
        storage: Some(target.mode()),
        local_path: target.local_path().map(|path| path.display().to_string()),
        cache_hit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gpt_vis_body_becomes_tagged_spec() {
        let draft = gpt_vis_draft(json!({
            "type": "line",
            "data": [{"time": "2024", "value": 1}],
            "width": 640
        }))
        .expect("valid body");

        assert_eq!(draft.width, Some(640));
        assert_eq!(draft.height, None);
        assert_eq!(draft.format, None);
        let spec = draft.spec.expect("spec");
        assert_eq!(spec["source"], GPT_VIS_SOURCE);
        assert_eq!(spec["type"], "line");
    }

    #[test]
    fn gpt_vis_rejects_non_object_bodies() {
        let err = gpt_vis_draft(json!([1, 2, 3])).expect_err("array body");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn gpt_vis_rejects_fractional_dimensions() {
        let err = gpt_vis_draft(json!({"type": "bar", "height": 10.5})).expect_err("bad height");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn json_output_is_embedded_as_document() {
        let result = RenderResult::new(br#"{"nodes":3}"#.to_vec(), "application/json");
        assert_eq!(document(&result), json!({"nodes": 3}));

        let text = RenderResult::new(b"not json".to_vec(), "application/json");
        assert_eq!(document(&text), json!("not json"));
    }
}
