//! Test server harness for E2E testing.
//!
//! Provides `TestGatekeeperServer` for spawning real gatekeeper instances
//! backed by an in-memory store.

use crate::mock_upstreams::{MockIdentityProvider, MockUserDirectory};
use crate::token_builders::{TEST_AUDIENCE, TEST_IDP_DOMAIN};
use gatekeeper::config::Config;
use gatekeeper::observability::metrics::init_metrics_recorder;
use gatekeeper::routes::{self, AppState};
use gatekeeper::store::MemoryStore;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

/// Secret key used by test configurations.
pub const TEST_SECRET_KEY: &str = "test-secret-key-for-gatekeeper-0123456789";

static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide metrics handle. The global recorder can only be installed
/// once; later callers get a detached recorder's handle.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Baseline environment for a test gatekeeper.
///
/// Debug mode is on (no country filter, cookies without `Secure`) and the
/// second factor is not enforced. Override entries as needed.
pub fn test_vars(jwks_url: &str, directory_url: &str) -> HashMap<String, String> {
    HashMap::from([
        ("IDP_DOMAIN".to_string(), TEST_IDP_DOMAIN.to_string()),
        ("IDP_AUDIENCE".to_string(), TEST_AUDIENCE.to_string()),
        ("IDP_JWKS_URL".to_string(), jwks_url.to_string()),
        ("DIRECTORY_URL".to_string(), directory_url.to_string()),
        ("DIRECTORY_API_KEY".to_string(), "test-directory-key".to_string()),
        ("SECRET_KEY".to_string(), TEST_SECRET_KEY.to_string()),
        ("DEBUG".to_string(), "true".to_string()),
        ("ENABLE_2FA".to_string(), "false".to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ])
}

/// Test harness for spawning the gatekeeper in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_protected_requires_token() -> Result<(), anyhow::Error> {
///     let idp = MockIdentityProvider::start().await;
///     let directory = MockUserDirectory::with_users(&[TEST_EMAIL]).await;
///     let server = TestGatekeeperServer::spawn(&idp, &directory).await?;
///
///     let response = reqwest::get(format!("{}/protected", server.url())).await?;
///     assert_eq!(response.status(), 403);
///     Ok(())
/// }
/// ```
pub struct TestGatekeeperServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
    _handle: JoinHandle<()>,
}

impl TestGatekeeperServer {
    /// Spawn with [`test_vars`] pointing at the given mocks.
    pub async fn spawn(
        idp: &MockIdentityProvider,
        directory: &MockUserDirectory,
    ) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(test_vars(&idp.jwks_url(), &directory.url())).await
    }

    /// Spawn from an explicit environment map.
    ///
    /// The server:
    /// - Binds to a random available port (127.0.0.1:0)
    /// - Uses a fresh in-memory store
    /// - Serves with connection info so client addresses reach the pipeline
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::from_config(config, store.clone()));
        let app = routes::build_routes(Arc::clone(&state), test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            store,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The in-memory store behind sessions and rate limits.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Shared application state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestGatekeeperServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
