//! Shared counter/session store.
//!
//! Rate-limit windows and sessions live outside the process so several
//! gatekeeper instances see the same state. Atomicity is delegated to the
//! store: each [`SharedStore`] method is a single atomic operation.
//!
//! # Key Patterns
//!
//! - `rl:{client_key}` - sorted set of request timestamps (score = epoch seconds)
//! - `session:{id}` - JSON session record with a TTL

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Store operation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store operation '{0}' timed out")]
    Timeout(&'static str),

    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Operations the gatekeeper needs from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Record one hit in a sliding window, atomically:
    /// prune entries scored at or before `now - window`, count what remains,
    /// add `member` at score `now`, refresh the key's expiry to `window`.
    ///
    /// Returns the count observed before the add.
    async fn record_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError>;

    /// Write a string value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether a live value exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}
