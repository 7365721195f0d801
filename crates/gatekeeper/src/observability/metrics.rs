//! Metrics definitions for the gatekeeper.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gatekeeper_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: `admitted` or a `GateError` code (16 values)
//! - `endpoint`: known routes, everything else is `other`
//! - `result`: a handful of fixed strings per lookup
//!
//! Client addresses, emails, subjects and session ids are never labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle for `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gatekeeper_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gatekeeper_directory_lookup".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set directory lookup buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Pipeline
// ============================================================================

/// Metric: `gatekeeper_decisions_total{outcome}`
pub fn record_gate_decision(outcome: &'static str) {
    counter!("gatekeeper_decisions_total", "outcome" => outcome).increment(1);
}

/// Metric: `gatekeeper_rate_limit_hits_total`
pub fn record_rate_limit_hit() {
    counter!("gatekeeper_rate_limit_hits_total").increment(1);
}

/// Metric: `gatekeeper_jwks_fetch_total{outcome}` (`fresh`, `stale`, `unavailable`)
pub fn record_jwks_fetch(outcome: &'static str) {
    counter!("gatekeeper_jwks_fetch_total", "outcome" => outcome).increment(1);
}

/// Metric: `gatekeeper_geo_lookups_total{result}`
pub fn record_geo_lookup(result: &'static str) {
    counter!("gatekeeper_geo_lookups_total", "result" => result).increment(1);
}

/// Metric: `gatekeeper_directory_lookups_total{result}`,
/// `gatekeeper_directory_lookup_duration_seconds{result}`
pub fn record_directory_lookup(result: &'static str, duration: Duration) {
    histogram!("gatekeeper_directory_lookup_duration_seconds", "result" => result)
        .record(duration.as_secs_f64());
    counter!("gatekeeper_directory_lookups_total", "result" => result).increment(1);
}

/// Metric: `gatekeeper_sessions_total{operation}` (`created`, `destroyed`)
pub fn record_session_operation(operation: &'static str) {
    counter!("gatekeeper_sessions_total", "operation" => operation).increment(1);
}

// ============================================================================
// HTTP
// ============================================================================

/// Metric: `gatekeeper_http_requests_total`, `gatekeeper_http_request_duration_seconds`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);

    histogram!("gatekeeper_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => categorize_status_code(status_code)
    )
    .record(duration.as_secs_f64());

    counter!("gatekeeper_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/protected" => "/protected",
        "/logout" => "/logout",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_bounded() {
        assert_eq!(normalize_endpoint("/protected"), "/protected");
        assert_eq!(normalize_endpoint("/protected/../etc"), "other");
        assert_eq!(normalize_endpoint("/users/123"), "other");
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(302), "success");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_gate_decision("admitted");
        record_jwks_fetch("fresh");
        record_geo_lookup("allowed");
        record_directory_lookup("found", Duration::from_millis(12));
        record_session_operation("created");
        record_http_request("GET", "/health", 200, Duration::from_millis(1));
    }
}
