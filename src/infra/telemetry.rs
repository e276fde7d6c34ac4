use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so `build` can write the artifact to stdout.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

/// Register descriptions for every metric the pipeline emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_artifact_hit_total",
            Unit::Count,
            "Requests answered from a stored artifact."
        );
        describe_counter!(
            "tessera_artifact_miss_total",
            Unit::Count,
            "Requests that combined sources and stored a new artifact."
        );
        describe_counter!(
            "tessera_not_modified_total",
            Unit::Count,
            "Requests answered with 304 Not Modified."
        );
        describe_histogram!(
            "tessera_build_ms",
            Unit::Milliseconds,
            "Combine, minify and pre-compress latency on a cache miss."
        );
        describe_counter!(
            "tessera_store_evict_total",
            Unit::Count,
            "Artifacts evicted from the memory store due to capacity."
        );
        describe_counter!(
            "tessera_minify_fallback_total",
            Unit::Count,
            "HTML minifier stages that failed and passed their input through."
        );
    });
}
