//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{extract::State, http::header};

use crate::error::AppResult;
use crate::handlers::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics handler for Prometheus scraping
///
/// Refreshes the `kafka_consumer_transport` gauges from the current consumer
/// status before encoding, so every scrape sees the latest transport
/// statistics.
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if encoding fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/metrics
/// # HELP metrics_path_total Metric paths seen per application
/// # TYPE metrics_path_total counter
/// metrics_path_total{application="cas",application_type="aggreg",metric_path="foo.aggreg.cas"} 42
/// ```
pub async fn handler(
    State(state): State<AppState>,
) -> AppResult<([(header::HeaderName, &'static str); 1], String)> {
    let status = state.status().status();
    state.metrics().observe_transport(&status.transport_metrics);

    let output = state.metrics().gather().map_err(|e| {
        tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
        e
    })?;

    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], output))
}
