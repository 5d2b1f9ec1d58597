//! # Observability
//!
//! Structured logging and Prometheus metrics initialization, done once at
//! startup. Components record metrics through the `metrics` facade; the
//! recorder installed here aggregates them for the scrape endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::config::{LoggingConfig, MetricsConfig};
use crate::core::error::{GatewayError, GatewayResult};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to the
/// gateway's own crate. Format is JSON for log collectors or pretty for
/// local development.
pub fn init_tracing(config: &LoggingConfig) -> GatewayResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("retail_gateway={},tower_http=warn", config.level))
    });

    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_target(true).json())
            .try_init(),
    }
    .map_err(|e| GatewayError::config(format!("failed to initialize tracing: {e}")))
}

/// Install the Prometheus metrics recorder.
///
/// Returns the handle the scrape endpoint renders from, or `None` when
/// metrics are disabled.
pub fn init_metrics(config: &MetricsConfig) -> GatewayResult<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GatewayError::config(format!("failed to install metrics recorder: {e}")))?;
    Ok(Some(handle))
}
