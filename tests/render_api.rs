mod support;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;

use support::{AppOptions, StubEngine, app, app_with, body_bytes, body_json, get, post_json};

#[tokio::test]
async fn health_reports_storage_cache_and_render_limits() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(get("/health"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["storage"], "local");
    assert!(body["s3Config"].is_null());
    assert_eq!(body["cache"]["enabled"], true);
    assert_eq!(body["cache"]["entries"], 0);
    assert_eq!(body["render"]["concurrency"], 5);
    assert_eq!(body["render"]["timeoutMs"], 30_000);
    assert_eq!(body["render"]["inFlight"], 0);
}

#[tokio::test]
async fn missing_spec_is_rejected_before_rendering() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &json!({"width": 400})))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errorKind"], "validation");
    assert_eq!(body["errorMessage"], "Missing required parameter: spec");
    assert!(body.get("detail").is_none());
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn invalid_dimensions_and_formats_are_validation_errors() {
    let app = app();

    for payload in [
        json!({"spec": {"type": "bar"}, "width": 0}),
        json!({"spec": {"type": "bar"}, "height": -20}),
        json!({"spec": {"type": "bar"}, "format": "gif"}),
        json!({"spec": "bar"}),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/render", &payload))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
        assert_eq!(body_json(response).await["errorKind"], "validation");
    }
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn malformed_json_body_is_bad_request() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/render")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"spec\":"))
        .expect("request should build");

    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errorKind"], "payload");
}

#[tokio::test]
async fn repeated_inline_request_hits_cache_with_identical_bytes() {
    let app = app();
    let payload = json!({"spec": {"type": "bar", "data": [3, 1, 2]}, "width": 640, "height": 480});

    let first = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &payload))
        .await
        .expect("router should respond");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(
        first.headers().get("x-chartd-cache").and_then(|v| v.to_str().ok()),
        Some("miss")
    );
    let first_bytes = body_bytes(first).await;

    let second = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &payload))
        .await
        .expect("router should respond");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get("x-chartd-cache").and_then(|v| v.to_str().ok()),
        Some("hit")
    );
    let second_bytes = body_bytes(second).await;

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(app.engine.calls(), 1);
}

#[tokio::test]
async fn disabled_cache_renders_every_time() {
    let app = app_with(AppOptions {
        cache_enabled: false,
        ..Default::default()
    });
    let payload = json!({"spec": {"type": "pie"}});

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/render", &payload))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.engine.calls(), 2);
}

#[tokio::test]
async fn legacy_route_renders_like_primary_route() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/chart/render",
            &json!({"spec": {"type": "bar"}, "format": "svg"}),
        ))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("image/svg+xml")
    );
}

#[tokio::test]
async fn json_format_returns_envelope_with_document() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/render",
            &json!({"spec": {"type": "bar"}, "format": "json", "width": 320}),
        ))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["resultObj"]["width"], 320);
    assert_eq!(body["resultObj"]["spec"]["type"], "bar");
    assert!(body.get("storage").is_none());
}

#[tokio::test]
async fn url_output_persists_chart_and_serves_it() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/render",
            &json!({"spec": {"type": "bar"}, "output": "url"}),
        ))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Chart generated successfully");
    assert_eq!(body["storage"], "local");
    let url = body["resultObj"].as_str().expect("url string").to_string();
    assert!(url.starts_with("/images/chart-"), "{url}");
    assert!(url.ends_with(".png"), "{url}");
    assert!(body["localPath"].as_str().is_some());

    let image = app
        .router
        .clone()
        .oneshot(get(&url))
        .await
        .expect("router should respond");
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(
        image.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(
        image
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("public, max-age=31536000, immutable")
    );
    let bytes = body_bytes(image).await;
    assert!(bytes.starts_with(b"png:800x600:"));
}

#[tokio::test]
async fn repeated_url_requests_persist_distinct_files() {
    let app = app();
    let payload = json!({"spec": {"type": "bar"}, "output": "url"});

    let mut urls = Vec::new();
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/render", &payload))
            .await
            .expect("router should respond");
        let body = body_json(response).await;
        urls.push(body["resultObj"].as_str().expect("url").to_string());
    }

    assert_ne!(urls[0], urls[1]);
    assert_eq!(app.engine.calls(), 1);
    let stored = std::fs::read_dir(app.images.path())
        .expect("images dir")
        .count();
    assert_eq!(stored, 2);
}

#[tokio::test]
async fn gpt_vis_route_tags_spec_and_returns_url() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/gpt-vis",
            &json!({"type": "line", "data": [{"time": "2024", "value": 3}]}),
        ))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["storage"], "local");
    assert!(
        body["resultObj"]
            .as_str()
            .is_some_and(|url| url.starts_with("/images/"))
    );

    let spec = app.engine.last_spec().expect("engine called");
    assert_eq!(spec["source"], "dify-plugin-visualization");
    assert_eq!(spec["type"], "line");
}

#[tokio::test]
async fn gpt_vis_rejects_non_object_body() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/gpt-vis", &json!("bar chart please")))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["errorMessage"],
        "Invalid options provided"
    );
}

#[tokio::test]
async fn engine_failure_is_internal_error_with_optional_detail() {
    let app = app_with(AppOptions {
        engine: StubEngine::failing(),
        ..Default::default()
    });
    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &json!({"spec": {"type": "nope"}})))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["errorKind"], "engine");
    assert!(body.get("detail").is_none());

    let debug_app = app_with(AppOptions {
        engine: StubEngine::failing(),
        debug_errors: true,
        ..Default::default()
    });
    let response = debug_app
        .router
        .clone()
        .oneshot(post_json("/api/render", &json!({"spec": {"type": "nope"}})))
        .await
        .expect("router should respond");
    let body = body_json(response).await;
    let detail = body["detail"].as_array().expect("detail chain");
    assert!(
        detail
            .iter()
            .any(|line| line.as_str().is_some_and(|l| l.contains("unknown chart type")))
    );
}

#[tokio::test]
async fn failed_renders_are_not_cached() {
    let app = app_with(AppOptions {
        engine: StubEngine::failing(),
        ..Default::default()
    });
    let payload = json!({"spec": {"type": "nope"}});

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/render", &payload))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(app.engine.calls(), 2);
    assert_eq!(app.pipeline.cache().map(|cache| cache.len()), Some(0));
}

#[tokio::test]
async fn unknown_routes_return_json_not_found() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(get("/api/unknown"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errorMessage"], "Endpoint not found");
}

#[tokio::test]
async fn missing_and_unsafe_image_names_are_not_found() {
    let app = app();

    for uri in ["/images/chart-missing.png", "/images/..%2Fsecret"] {
        let response = app
            .router
            .clone()
            .oneshot(get(uri))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn api_key_guards_render_routes_only() {
    let app = app_with(AppOptions {
        api_key: Some("top-secret".to_string()),
        ..Default::default()
    });
    let payload = json!({"spec": {"type": "bar"}});

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &payload))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["errorKind"], "unauthorized");

    let mut request = post_json("/api/render", &payload);
    request
        .headers_mut()
        .insert("x-api-key", "top-secret".parse().expect("header"));
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let mut request = post_json("/api/render", &payload);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer top-secret".parse().expect("header"),
    );
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get("/health"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_rejects_excess_requests() {
    let app = app_with(AppOptions {
        rate_limit_max_requests: 2,
        ..Default::default()
    });
    let payload = json!({"spec": {"type": "bar"}});

    for remaining in ["1", "0"] {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/render", &payload))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok()),
            Some(remaining)
        );
    }

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &payload))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_json(response).await["errorKind"], "rate_limited");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = app_with(AppOptions {
        max_body_bytes: 64,
        ..Default::default()
    });
    let payload = json!({"spec": {"type": "bar", "data": vec![1; 200]}});

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/render", &payload))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn cors_preflight_allows_any_origin_by_default() {
    let app = app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/render")
        .header(header::ORIGIN, "https://dashboard.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("request should build");

    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
