//! Signing-key cache for the identity provider's published JWKS.
//!
//! Keys are cached for a fixed TTL. When a refresh fails and an older key set
//! is held, the older set is served as [`KeySetFetch::Stale`] so a short
//! identity-provider outage does not lock every caller out.
//!
//! # Concurrency
//!
//! - Reads of a fresh set take only the shared read lock.
//! - Refreshes are serialized behind `refresh_guard`. Every attempt bumps
//!   `refresh_generation`, success or not. A caller that waited on the guard
//!   and sees the generation moved reuses that attempt's outcome, so N
//!   concurrent callers on a cold or expired cache produce one network fetch,
//!   also while the endpoint is failing.

use crate::observability::metrics;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Timeout for a single JWKS fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON Web Key from the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (expected "RSA").
    pub kty: String,

    /// Key ID. Keys without one cannot be selected and are skipped.
    #[serde(default)]
    pub kid: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Keys from one successful fetch.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
    ttl: Duration,
}

impl SigningKeySet {
    fn new(jwks: Vec<Jwk>, ttl: Duration) -> Self {
        let keys = jwks
            .into_iter()
            .filter_map(|key| match key.kid.clone() {
                Some(kid) if !kid.is_empty() => Some((kid, key)),
                _ => None,
            })
            .collect();
        Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Look up a key by identifier.
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// When this set was fetched.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Whether the set is younger than its TTL.
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Outcome of [`SigningKeyCache::fetch`].
#[derive(Debug, Clone)]
pub enum KeySetFetch {
    /// Within TTL, or just refreshed.
    Fresh(Arc<SigningKeySet>),
    /// Refresh failed; this is the last set that was fetched successfully.
    Stale(Arc<SigningKeySet>),
    /// Refresh failed and nothing was ever cached.
    Unavailable,
}

impl KeySetFetch {
    pub fn key_set(&self) -> Option<&Arc<SigningKeySet>> {
        match self {
            KeySetFetch::Fresh(set) | KeySetFetch::Stale(set) => Some(set),
            KeySetFetch::Unavailable => None,
        }
    }
}

/// Caches the identity provider's signing keys.
pub struct SigningKeyCache {
    jwks_url: String,
    http_client: reqwest::Client,
    cache: RwLock<Option<Arc<SigningKeySet>>>,
    refresh_guard: Mutex<()>,
    refresh_generation: AtomicU64,
    ttl: Duration,
}

impl SigningKeyCache {
    /// Create a cache with the default TTL.
    pub fn new(jwks_url: String) -> Self {
        Self::with_ttl(jwks_url, Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS))
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(jwks_url: String, ttl: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gatekeeper.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: RwLock::new(None),
            refresh_guard: Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Current key set, fresh or not, without any I/O.
    pub async fn cached(&self) -> Option<Arc<SigningKeySet>> {
        self.cache.read().await.clone()
    }

    /// Return the key set, refreshing it when missing or past TTL.
    #[instrument(skip_all)]
    pub async fn fetch(&self) -> KeySetFetch {
        let generation = self.refresh_generation.load(Ordering::Acquire);
        if let Some(set) = self.cached().await {
            if set.is_fresh() {
                return KeySetFetch::Fresh(set);
            }
        }

        let _guard = self.refresh_guard.lock().await;

        let previous = self.cached().await;
        if let Some(set) = &previous {
            if set.is_fresh() {
                return KeySetFetch::Fresh(Arc::clone(set));
            }
        }

        // Another attempt finished while this caller waited.
        if self.refresh_generation.load(Ordering::Acquire) != generation {
            return Self::fallback(previous, "refresh failed while waiting");
        }

        let result = self.fetch_remote().await;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(set) => KeySetFetch::Fresh(self.store(set).await),
            Err(reason) => Self::fallback(previous, &reason),
        }
    }

    fn fallback(previous: Option<Arc<SigningKeySet>>, reason: &str) -> KeySetFetch {
        match previous {
            Some(set) => {
                tracing::warn!(
                    target: "gatekeeper.auth.jwks",
                    reason = %reason,
                    age_seconds = set.fetched_at().elapsed().as_secs(),
                    "JWKS refresh failed, serving stale keys"
                );
                metrics::record_jwks_fetch("stale");
                KeySetFetch::Stale(set)
            }
            None => {
                tracing::error!(
                    target: "gatekeeper.auth.jwks",
                    reason = %reason,
                    "JWKS refresh failed with empty cache"
                );
                metrics::record_jwks_fetch("unavailable");
                KeySetFetch::Unavailable
            }
        }
    }

    /// Refresh unconditionally, keeping the cached set on failure.
    ///
    /// Returns the number of keys now cached.
    pub async fn force_refresh(&self) -> Result<usize, String> {
        let _guard = self.refresh_guard.lock().await;
        let result = self.fetch_remote().await;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        Ok(self.store(result?).await.len())
    }

    async fn store(&self, set: SigningKeySet) -> Arc<SigningKeySet> {
        let set = Arc::new(set);
        *self.cache.write().await = Some(Arc::clone(&set));
        metrics::record_jwks_fetch("fresh");
        tracing::info!(
            target: "gatekeeper.auth.jwks",
            key_count = set.len(),
            "JWKS cache refreshed"
        );
        set
    }

    async fn fetch_remote(&self) -> Result<SigningKeySet, String> {
        tracing::debug!(target: "gatekeeper.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("endpoint returned {}", response.status()));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| format!("unparsable body: {e}"))?;

        Ok(SigningKeySet::new(jwks.keys, self.ttl))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwks_body() -> serde_json::Value {
        json!({
            "keys": [
                {"kty": "RSA", "kid": "key-1", "n": "AQAB", "e": "AQAB", "alg": "RS256", "use": "sig"},
                {"kty": "RSA", "kid": "key-2", "n": "AQAB", "e": "AQAB"},
                {"kty": "RSA", "n": "AQAB", "e": "AQAB"}
            ]
        })
    }

    async fn jwks_server(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(status).set_body_json(jwks_body()))
            .mount(&server)
            .await;
        server
    }

    fn jwks_url(server: &MockServer) -> String {
        format!("{}/.well-known/jwks.json", server.uri())
    }

    #[test]
    fn test_jwk_deserialization() {
        let jwk: Jwk = serde_json::from_value(json!({
            "kty": "RSA", "kid": "k", "n": "abc", "e": "AQAB", "alg": "RS256", "use": "sig"
        }))
        .unwrap();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid.as_deref(), Some("k"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
    }

    #[test]
    fn test_keys_without_kid_skipped() {
        let response: JwksResponse = serde_json::from_value(jwks_body()).unwrap();
        let set = SigningKeySet::new(response.keys, Duration::from_secs(60));

        assert_eq!(set.len(), 2);
        assert!(set.get("key-1").is_some());
        assert!(set.get("missing").is_none());
        assert!(set.is_fresh());
    }

    #[tokio::test]
    async fn test_fetch_fresh_from_endpoint() {
        let server = jwks_server(200).await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        let fetched = cache.fetch().await;
        assert!(matches!(fetched, KeySetFetch::Fresh(_)), "got {fetched:?}");
        assert_eq!(fetched.key_set().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_cache_served_without_io() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .expect(1)
            .mount(&server)
            .await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        for _ in 0..3 {
            assert!(matches!(cache.fetch().await, KeySetFetch::Fresh(_)));
        }
        // Dropping the server verifies the single expected call.
    }

    #[tokio::test]
    async fn test_unavailable_when_empty_and_endpoint_fails() {
        let server = jwks_server(503).await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        assert!(matches!(cache.fetch().await, KeySetFetch::Unavailable));
        assert!(cache.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        assert!(matches!(cache.fetch().await, KeySetFetch::Unavailable));
    }

    #[tokio::test]
    async fn test_stale_served_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // Zero TTL: every fetch attempts a refresh.
        let cache = SigningKeyCache::with_ttl(jwks_url(&server), Duration::ZERO);

        assert!(matches!(cache.fetch().await, KeySetFetch::Fresh(_)));
        let fetched = cache.fetch().await;
        assert!(matches!(fetched, KeySetFetch::Stale(_)), "got {fetched:?}");
        assert!(fetched.key_set().unwrap().get("key-1").is_some());
    }

    #[tokio::test]
    async fn test_force_refresh_failure_keeps_cached_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        assert_eq!(cache.force_refresh().await.unwrap(), 2);
        assert!(cache.force_refresh().await.is_err());
        assert_eq!(cache.cached().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failed_cold_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
            .expect(1)
            .mount(&server)
            .await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        let results = futures::future::join_all((0..8).map(|_| cache.fetch())).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, KeySetFetch::Unavailable)));
    }

    #[tokio::test]
    async fn test_next_caller_retries_after_failed_refresh() {
        let server = jwks_server(503).await;
        let cache = SigningKeyCache::new(jwks_url(&server));

        assert!(matches!(cache.fetch().await, KeySetFetch::Unavailable));
        assert!(matches!(cache.fetch().await, KeySetFetch::Unavailable));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_key_set_accessor() {
        assert!(KeySetFetch::Unavailable.key_set().is_none());
    }
}
