//! Banner, liveness and readiness handlers.
//!
//! - `/`: service banner
//! - `/health`: liveness, never touches dependencies
//! - `/ready`: readiness, pings the shared store and reports the signing-key
//!   cache state

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Readiness probe body.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub signing_keys: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Gatekeeper is running" }))
}

/// `GET /health`
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /ready`
///
/// 200 when the shared store answers, 503 otherwise. Signing keys are loaded
/// lazily, so an empty key cache is reported but does not fail the probe.
///
/// Store errors are logged; the body only says the dependency is down.
#[tracing::instrument(skip_all, name = "gatekeeper.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let signing_keys = match state.key_cache.cached().await {
        Some(set) if set.is_fresh() => "fresh",
        Some(_) => "stale",
        None => "empty",
    };

    if let Err(e) = state.store.ping().await {
        tracing::warn!(target: "gatekeeper.health", error = %e, "Readiness check failed: store unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                store: "unavailable",
                signing_keys,
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            store: "available",
            signing_keys,
            error: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_banner() {
        let Json(body) = root().await;
        assert_eq!(body["message"], "Gatekeeper is running");
    }

    #[tokio::test]
    async fn test_health_check() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_readiness_response_serialization() {
        let ready = ReadinessResponse {
            status: "ready",
            store: "available",
            signing_keys: "empty",
            error: None,
        };
        let json = serde_json::to_string(&ready).unwrap();
        assert!(json.contains("\"status\":\"ready\""));
        assert!(json.contains("\"signing_keys\":\"empty\""));
        assert!(!json.contains("\"error\""));
    }
}
