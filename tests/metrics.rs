mod support;

use std::collections::HashSet;
use std::sync::Arc;

use chartd::application::render::{
    Delivery, RenderController, RenderDraft, RenderLimits, RenderPipeline,
};
use chartd::cache::{CacheConfig, RenderCache};
use chartd::infra::storage::{ChartStorage, DEFAULT_PUBLIC_PATH, LocalStorage};
use chartd::infra::telemetry;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use support::StubEngine;
use tempfile::TempDir;

fn draft(kind: &str) -> RenderDraft {
    RenderDraft {
        spec: Some(json!({"type": kind, "data": [1, 2, 3]})),
        width: None,
        height: None,
        format: None,
    }
}

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let images = TempDir::new().expect("temp dir");
    let controller = Arc::new(RenderController::new(
        Arc::new(StubEngine::default()),
        RenderLimits::default(),
    ));
    let cache = Arc::new(RenderCache::new(&CacheConfig {
        max_entries: 1,
        ..Default::default()
    }));
    let storage = Arc::new(ChartStorage::local_only(LocalStorage::new(
        images.path(),
        DEFAULT_PUBLIC_PATH,
    )));
    let pipeline = RenderPipeline::new(Some(cache), controller, storage);

    // miss, then hit, then a second spec evicts the first
    pipeline
        .execute(draft("line"), Delivery::Inline)
        .await
        .expect("first render");
    pipeline
        .execute(draft("line"), Delivery::Inline)
        .await
        .expect("cached render");
    pipeline
        .execute(draft("bar"), Delivery::Reference)
        .await
        .expect("persisted render");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "chartd_cache_hit_total",
        "chartd_cache_miss_total",
        "chartd_cache_evict_total",
        "chartd_cache_entries",
        "chartd_render_in_flight",
        "chartd_render_ms",
        "chartd_storage_persist_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
