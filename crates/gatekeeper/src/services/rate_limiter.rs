//! Sliding-window rate limiter backed by the shared store.
//!
//! Every check records the current attempt, including the attempt that trips
//! the limit. A client that keeps hammering stays limited until enough of its
//! own attempts age out of the window.

use crate::observability::metrics;
use crate::store::{SharedStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Per-client sliding-window limiter.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    window: Duration,
    max_attempts: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, window: Duration, max_attempts: u64) -> Self {
        Self {
            store,
            window,
            max_attempts,
        }
    }

    /// Record an attempt for `client_key` and report whether it is limited.
    pub async fn check(&self, client_key: &str) -> Result<bool, StoreError> {
        self.check_at(client_key, Utc::now()).await
    }

    /// [`check`](Self::check) against an explicit clock.
    #[instrument(skip_all)]
    pub async fn check_at(&self, client_key: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let key = format!("rl:{client_key}");
        let score = now.timestamp_micros() as f64 / 1_000_000.0;
        // Unique per attempt so simultaneous requests are all counted.
        let member = format!("{}-{}", now.timestamp_micros(), uuid::Uuid::new_v4());

        let count = self
            .store
            .record_hit(&key, score, self.window, &member)
            .await?;

        let limited = count >= self.max_attempts;
        if limited {
            metrics::record_rate_limit_hit();
            tracing::info!(
                target: "gatekeeper.rate_limiter",
                attempts_in_window = count + 1,
                max_attempts = self.max_attempts,
                "Client rate limited"
            );
        }
        Ok(limited)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn limiter(store: Arc<MemoryStore>) -> RateLimiter {
        RateLimiter::new(store, Duration::from_secs(300), 5)
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sixth_attempt_in_window_is_limited() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for i in 0..5 {
            assert!(!limiter.check_at("10.0.0.1", at(i)).await.unwrap(), "attempt {i}");
        }
        assert!(limiter.check_at("10.0.0.1", at(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_elapsing_resets_limit() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for i in 0..6 {
            limiter.check_at("10.0.0.1", at(i)).await.unwrap();
        }

        // All six attempts are now older than the window.
        assert!(!limiter.check_at("10.0.0.1", at(306)).await.unwrap());
    }

    #[tokio::test]
    async fn test_limited_attempts_still_recorded() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for i in 0..10 {
            limiter.check_at("10.0.0.1", at(i)).await.unwrap();
        }

        // Attempts 0..=4 aged out; the five limited attempts 5..=9 remain.
        assert!(limiter.check_at("10.0.0.1", at(304)).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_instant_attempts_all_counted() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for _ in 0..5 {
            limiter.check_at("10.0.0.1", at(0)).await.unwrap();
        }
        assert!(limiter.check_at("10.0.0.1", at(0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for i in 0..6 {
            limiter.check_at("10.0.0.1", at(i)).await.unwrap();
        }
        assert!(!limiter.check_at("10.0.0.2", at(6)).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let limiter = limiter(store);

        assert!(limiter.check("10.0.0.1").await.is_err());
    }
}
