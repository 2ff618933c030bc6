use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, MakeWriter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::render::{
    METRIC_RENDER_IN_FLIGHT, METRIC_RENDER_MS, METRIC_RENDER_REJECTED, METRIC_RENDER_TIMEOUT,
};
use crate::cache::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EVICT, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT,
    METRIC_CACHE_MISS,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::infra::storage::{METRIC_STORAGE_FALLBACK, METRIC_STORAGE_PERSIST};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    init_with_writer(logging, io::stdout)
}

/// Same as [`init`], writing log lines to `writer` instead of stdout.
pub fn init_with_writer<W>(logging: &LoggingSettings, writer: W) -> Result<(), InfraError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of render cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of render cache misses, expired entries included."
        );
        describe_counter!(
            METRIC_CACHE_EXPIRED,
            Unit::Count,
            "Total number of cache entries dropped after their TTL."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
        describe_gauge!(
            METRIC_CACHE_ENTRIES,
            Unit::Count,
            "Current number of resident cache entries."
        );
        describe_gauge!(
            METRIC_RENDER_IN_FLIGHT,
            Unit::Count,
            "Engine calls currently holding an admission slot."
        );
        describe_counter!(
            METRIC_RENDER_TIMEOUT,
            Unit::Count,
            "Total number of renders that exceeded their deadline."
        );
        describe_counter!(
            METRIC_RENDER_REJECTED,
            Unit::Count,
            "Total number of renders refused for lack of capacity."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Render latency in milliseconds, labelled by result."
        );
        describe_counter!(
            METRIC_STORAGE_PERSIST,
            Unit::Count,
            "Total number of charts persisted, labelled by backend."
        );
        describe_counter!(
            METRIC_STORAGE_FALLBACK,
            Unit::Count,
            "Total number of object-store failures that fell back to local storage."
        );
    });
}
