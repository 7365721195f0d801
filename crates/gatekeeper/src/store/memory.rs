//! In-process [`SharedStore`] for tests and single-instance local runs.
//!
//! Mirrors the Redis semantics closely enough for the gatekeeper's use:
//! string values expire on a monotonic clock, window records expire on the
//! caller-supplied epoch clock.

use super::{SharedStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

enum Entry {
    Value {
        value: String,
        expires_at: Instant,
    },
    Window {
        hits: Vec<(f64, String)>,
        /// Epoch seconds, same clock as the scores.
        expires_at: f64,
    },
}

/// Mutex-guarded map standing in for the shared store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, to exercise outage paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stored value for `key`, if live.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(Entry::Value { value, expires_at }) if *expires_at > Instant::now() => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.check_available()?;
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn record_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        let mut entries = self.lock()?;
        let window_secs = window.as_secs_f64();
        let cutoff = now - window_secs;

        let entry = entries.entry(key.to_string()).or_insert(Entry::Window {
            hits: Vec::new(),
            expires_at: now + window_secs,
        });

        // A string under the same key, or an expired window, starts over.
        let expired = match entry {
            Entry::Window { expires_at, .. } => *expires_at <= now,
            Entry::Value { .. } => true,
        };
        if expired {
            *entry = Entry::Window {
                hits: Vec::new(),
                expires_at: now + window_secs,
            };
        }

        let Entry::Window { hits, expires_at } = entry else {
            return Err(StoreError::Backend("window entry type mismatch".to_string()));
        };

        hits.retain(|(score, _)| *score > cutoff);
        let count = hits.len() as u64;
        hits.push((now, member.to_string()));
        *expires_at = now + window_secs;

        Ok(count)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Backend(format!("ttl out of range: {ttl:?}")))?;
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry::Value {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.lock()?;
        Ok(match entries.get(key) {
            Some(Entry::Value { expires_at, .. }) => *expires_at > Instant::now(),
            Some(Entry::Window { hits, .. }) => !hits.is_empty(),
            None => false,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_record_hit_counts_before_add() {
        let store = MemoryStore::new();

        assert_eq!(store.record_hit("rl:a", 1000.0, WINDOW, "m1").await.unwrap(), 0);
        assert_eq!(store.record_hit("rl:a", 1001.0, WINDOW, "m2").await.unwrap(), 1);
        assert_eq!(store.record_hit("rl:b", 1001.0, WINDOW, "m3").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_hit_prunes_old_entries() {
        let store = MemoryStore::new();

        store.record_hit("rl:a", 1000.0, WINDOW, "m1").await.unwrap();
        store.record_hit("rl:a", 1100.0, WINDOW, "m2").await.unwrap();

        // 1000 is now exactly at the cutoff and is pruned; 1100 survives.
        assert_eq!(store.record_hit("rl:a", 1300.0, WINDOW, "m3").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_is_an_error() {
        let store = MemoryStore::new();

        assert!(store
            .set_with_ttl("session:x", "{}", Duration::MAX)
            .await
            .is_err());
        assert!(!store.exists("session:x").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("session:x", "{}", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(store.exists("session:x").await.unwrap());
        assert_eq!(store.get("session:x").as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(!store.exists("session:x").await.unwrap());
        assert!(store.get("session:x").is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(10))
            .await
            .unwrap();

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(store.ping().await.is_err());
        assert!(store.exists("k").await.is_err());
        assert!(store.record_hit("rl:a", 1.0, WINDOW, "m").await.is_err());

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
