//! Prometheus metrics endpoint handler.
//!
//! `/metrics` is unauthenticated so Prometheus can scrape it. Labels are
//! bounded and never carry addresses, emails or identifiers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// `GET /metrics`
#[tracing::instrument(skip_all, name = "gatekeeper.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
