use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Per-statement sqlx logging stays at `warn` unless `RUST_LOG` asks otherwise.
const QUIET_SQLX_DIRECTIVE: &str = "sqlx::query=warn";

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = build_env_filter(logging)?;

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
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn build_env_filter(logging: &LoggingSettings) -> Result<EnvFilter, InfraError> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let mentions_sqlx = std::env::var(EnvFilter::DEFAULT_ENV)
        .map(|value| value.contains("sqlx"))
        .unwrap_or(false);
    if mentions_sqlx {
        return Ok(filter);
    }

    let directive = QUIET_SQLX_DIRECTIVE
        .parse()
        .map_err(|err| InfraError::telemetry(format!("invalid log directive: {err}")))?;
    Ok(filter.add_directive(directive))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "yatube_page_cache_hit_total",
            Unit::Count,
            "Total number of pages served from the page cache."
        );
        describe_counter!(
            "yatube_page_cache_miss_total",
            Unit::Count,
            "Total number of cacheable requests rendered afresh."
        );
        describe_counter!(
            "yatube_page_cache_clear_total",
            Unit::Count,
            "Total number of page cache invalidations after content writes."
        );
        describe_gauge!(
            "yatube_page_cache_entries",
            Unit::Count,
            "Current number of pages held in the page cache."
        );
        describe_histogram!(
            "yatube_http_request_ms",
            Unit::Milliseconds,
            "Request latency in milliseconds, labelled by status class."
        );
    });
}
