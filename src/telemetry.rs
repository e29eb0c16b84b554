//! Tracing subscriber installation and metric descriptions.
//!
//! Library code only emits through `tracing` and `metrics`; installing a
//! subscriber or a recorder is the host's call.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::TelemetryError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            TelemetryError::Install(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Safe to call
/// more than once; only the first call registers.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "entity_cache_hit_total",
            Unit::Count,
            "Total number of reads served from the store."
        );
        describe_counter!(
            "entity_cache_miss_total",
            Unit::Count,
            "Total number of reads that computed and inserted a value."
        );
        describe_counter!(
            "entity_cache_insert_total",
            Unit::Count,
            "Total number of entries written to the store."
        );
        describe_counter!(
            "entity_cache_evict_total",
            Unit::Count,
            "Total number of entries dropped for expiry or capacity."
        );
        describe_counter!(
            "entity_cache_stale_insert_total",
            Unit::Count,
            "Total number of computed values not stored because a dependency was invalidated mid-compute."
        );
        describe_counter!(
            "entity_cache_invalidate_total",
            Unit::Count,
            "Total number of entries removed by invalidation, by scope."
        );
        describe_counter!(
            "entity_cache_bypass_total",
            Unit::Count,
            "Total number of calls that skipped the store after an internal cache error."
        );
        describe_counter!(
            "entity_cache_lock_timeout_total",
            Unit::Count,
            "Total number of per-key lock acquisitions that timed out."
        );
        describe_gauge!(
            "entity_cache_entries",
            Unit::Count,
            "Current number of entries in the store."
        );
        describe_histogram!(
            "entity_cache_upstream_ms",
            Unit::Milliseconds,
            "Latency of calls to the wrapped service in milliseconds."
        );
        describe_histogram!(
            "entity_cache_invalidation_apply_ms",
            Unit::Milliseconds,
            "Latency of applying a batch of invalidation messages in milliseconds."
        );
    });
}
