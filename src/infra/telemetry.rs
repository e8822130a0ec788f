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
/// Logs go to stderr so rendered views on stdout stay clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "portal_query_cache_hit_total",
            Unit::Count,
            "Total number of queries served from a fresh cache entry."
        );
        describe_counter!(
            "portal_query_cache_miss_total",
            Unit::Count,
            "Total number of queries that scheduled a new request."
        );
        describe_counter!(
            "portal_query_fetch_coalesced_total",
            Unit::Count,
            "Total number of queries joined to a request already in flight."
        );
        describe_counter!(
            "portal_query_fetch_discarded_total",
            Unit::Count,
            "Total number of responses discarded because a newer request superseded them."
        );
        describe_counter!(
            "portal_query_fetch_error_total",
            Unit::Count,
            "Total number of failed requests applied to the cache."
        );
        describe_counter!(
            "portal_query_debounce_emit_total",
            Unit::Count,
            "Total number of settled values emitted by debounced inputs."
        );
        describe_histogram!(
            "portal_query_fetch_ms",
            Unit::Milliseconds,
            "Catalog request latency in milliseconds, retries included."
        );
    });
}
