//! Gatekeeper
//!
//! Entry point for the request gatekeeper service.

use gatekeeper::config::Config;
use gatekeeper::observability::metrics::init_metrics_recorder;
use gatekeeper::routes::{self, AppState};
use gatekeeper::store::RedisStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Gatekeeper");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        idp_domain = %config.idp_domain,
        bind_address = %config.bind_address,
        debug = config.debug,
        enable_2fa = config.enable_2fa,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    info!("Connecting to shared store...");
    let store = RedisStore::connect(&config.redis_url).await.map_err(|e| {
        error!("Failed to connect to shared store: {}", e);
        e
    })?;
    info!("Shared store connection established");

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::from_config(config, Arc::new(store)));

    // Warm the signing-key cache. Failure is not fatal: keys are fetched
    // again on first use.
    match state.key_cache.force_refresh().await {
        Ok(count) => info!(key_count = count, "Signing keys loaded"),
        Err(e) => warn!(error = %e, "Initial signing-key fetch failed, continuing"),
    }

    let app = routes::build_routes(Arc::clone(&state), metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Gatekeeper listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gatekeeper shutdown complete");

    Ok(())
}

/// `RUST_LOG` filter (default `gatekeeper=info,tower_http=info`); JSON lines
/// when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gatekeeper=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
