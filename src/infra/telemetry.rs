//! Tracing subscriber setup and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

/// One counter per orchestrator branch or tier failure.
const LOOKUP_COUNTERS: &[(&str, &str)] = &[
    ("isr_cache_fast_hit_total", "Fetches served from a fresh fast-tier envelope."),
    ("isr_cache_fast_stale_total", "Fetches that found an expired fast-tier envelope."),
    ("isr_cache_fast_miss_total", "Fetches that found no fast-tier envelope."),
    ("isr_cache_durable_hit_total", "Fetches served from the durable tier after a fast-tier miss."),
    ("isr_cache_bypass_total", "Fetches sent straight to the origin without touching either tier."),
    ("isr_cache_forced_refresh_total", "Fetches that forced a cache refresh."),
    ("isr_cache_tier_error_total", "Cache tier reads or writes that failed and were skipped."),
];

const REVALIDATION_COUNTERS: &[(&str, &str)] = &[
    ("isr_revalidation_scheduled_total", "Background revalidation tasks enqueued."),
    ("isr_revalidation_failed_total", "Background revalidation tasks whose origin fetch failed."),
];

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber and describe the crate's metrics.
///
/// `RUST_LOG` directives, when set, refine the configured default level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    METRIC_DESCRIPTIONS.call_once(describe_metrics);

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(format_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn format_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

fn describe_metrics() {
    for &(name, description) in LOOKUP_COUNTERS.iter().chain(REVALIDATION_COUNTERS) {
        describe_counter!(name, Unit::Count, description);
    }
    describe_histogram!(
        "isr_revalidation_ms",
        Unit::Milliseconds,
        "Time from enqueue to completed write-through."
    );
}
