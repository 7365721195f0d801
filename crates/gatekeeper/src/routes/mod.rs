//! HTTP routes for the gatekeeper.
//!
//! Defines the Axum router and application state.

use crate::auth::{SigningKeyCache, TokenVerifier};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_gatekeeper};
use crate::pipeline::Gatekeeper;
use crate::services::{
    AntiForgeryTokenService, DirectoryClient, GeoFilter, RateLimiter, SessionStore, UserDirectory,
};
use crate::store::SharedStore;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Header carrying the echoed anti-forgery value.
pub const ANTI_FORGERY_HEADER: &str = "x-csrf-token";

/// Application state shared across all handlers.
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,

    /// Admission pipeline for protected routes.
    pub gatekeeper: Gatekeeper,

    /// Session issuance and validation.
    pub sessions: Arc<SessionStore>,

    /// Anti-forgery token issuance and verification.
    pub anti_forgery: Arc<AntiForgeryTokenService>,

    /// Shared rate-limit/session store (readiness checks).
    pub store: Arc<dyn SharedStore>,

    /// Signing-key cache (readiness checks).
    pub key_cache: Arc<SigningKeyCache>,
}

impl AppState {
    /// Wire every component from `config` on top of `store`, talking to the
    /// configured user directory.
    pub fn from_config(config: Config, store: Arc<dyn SharedStore>) -> Self {
        let directory = Arc::new(DirectoryClient::new(
            config.directory_url.clone(),
            config.directory_api_key.clone(),
        ));
        Self::with_directory(config, store, directory)
    }

    /// Like [`from_config`](Self::from_config) with an explicit directory.
    pub fn with_directory(
        config: Config,
        store: Arc<dyn SharedStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let key_cache = Arc::new(SigningKeyCache::with_ttl(
            config.idp_jwks_url.clone(),
            Duration::from_secs(config.jwks_cache_ttl_seconds),
        ));
        let verifier = TokenVerifier::new(
            Arc::clone(&key_cache),
            config.idp_audience.clone(),
            config.idp_issuer.clone(),
        );
        let rate_limiter = RateLimiter::new(
            Arc::clone(&store),
            Duration::from_secs(config.rate_limit_window_seconds),
            config.max_attempts_per_window,
        );
        // Debug deployments run without the country filter.
        let geo_filter = if config.debug {
            GeoFilter::disabled()
        } else {
            GeoFilter::new(config.geoip_url.clone(), config.allowed_countries.clone())
        };
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&store),
            Duration::from_secs(config.session_ttl_seconds),
        ));
        let anti_forgery = Arc::new(AntiForgeryTokenService::new(&config.secret_key));

        let gatekeeper = Gatekeeper::new(
            rate_limiter,
            geo_filter,
            verifier,
            directory,
            Arc::clone(&sessions),
            Arc::clone(&anti_forgery),
            config.enable_2fa,
        );

        Self {
            config: Arc::new(config),
            gatekeeper,
            sessions,
            anti_forgery,
            store,
            key_cache,
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(target: "gatekeeper.routes", origin = %origin, error = %e, "Ignoring unusable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(ANTI_FORGERY_HEADER),
        ])
        .expose_headers([HeaderName::from_static(ANTI_FORGERY_HEADER)])
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/` - Service banner - public
/// - `/health` - Liveness probe - public
/// - `/ready` - Readiness probe (store + signing keys) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/protected` - Requires the full admission pipeline
/// - `/logout` - Requires a live session and an anti-forgery token
/// - CORS restricted to the configured origins, with credentials
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = cors_layer(&state.config);

    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/logout", post(handlers::logout))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/protected", get(handlers::protected))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_gatekeeper,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. CorsLayer
    // 4. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(http_metrics_middleware))
}
