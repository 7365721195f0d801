//! Opaque session identifiers backed by the shared store.
//!
//! A session is valid exactly while `session:{id}` exists. There is no
//! separate revoked state: destroying a session deletes the record.

use crate::auth::VerifiedClaims;
use crate::errors::GateError;
use crate::observability::metrics;
use crate::store::{SharedStore, StoreError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Random bytes per session id (64 base64url characters).
const SESSION_ID_BYTES: usize = 48;

#[derive(Serialize)]
struct SessionRecord<'a> {
    subject: &'a str,
    created_at: i64,
    expires_at: i64,
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Only ids that could have come from [`SessionStore::create`] reach the store.
fn is_well_formed(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Issues, validates and destroys sessions.
pub struct SessionStore {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    rng: SystemRandom,
}

impl SessionStore {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            rng: SystemRandom::new(),
        }
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session for `claims` and return its id.
    ///
    /// # Errors
    ///
    /// - `GateError::ServiceUnavailable` - the store write failed
    /// - `GateError::Internal` - the CSPRNG failed
    #[instrument(skip_all)]
    pub async fn create(&self, claims: &VerifiedClaims) -> Result<String, GateError> {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| GateError::Internal("CSPRNG failure".to_string()))?;
        let session_id = URL_SAFE_NO_PAD.encode(bytes);

        let ttl_seconds = i64::try_from(self.ttl.as_secs())
            .map_err(|_| GateError::Internal("session ttl out of range".to_string()))?;
        let created_at = Utc::now().timestamp();
        let record = SessionRecord {
            subject: claims.subject(),
            created_at,
            expires_at: created_at.saturating_add(ttl_seconds),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| GateError::Internal(format!("session record encoding: {e}")))?;

        self.store
            .set_with_ttl(&session_key(&session_id), &payload, self.ttl)
            .await
            .map_err(|e| GateError::ServiceUnavailable(format!("session write: {e}")))?;

        metrics::record_session_operation("created");
        tracing::debug!(target: "gatekeeper.sessions", ttl_seconds = self.ttl.as_secs(), "Session created");
        Ok(session_id)
    }

    /// Whether `session_id` names a live session.
    ///
    /// Store failures are logged and reported as `false`.
    #[instrument(skip_all)]
    pub async fn validate(&self, session_id: &str) -> bool {
        if !is_well_formed(session_id) {
            return false;
        }

        match self.store.exists(&session_key(session_id)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(target: "gatekeeper.sessions", error = %e, "Session lookup failed");
                false
            }
        }
    }

    /// Delete a session. Destroying an unknown or already-destroyed id
    /// succeeds.
    #[instrument(skip_all)]
    pub async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        if !is_well_formed(session_id) {
            return Ok(());
        }

        self.store.delete(&session_key(session_id)).await?;
        metrics::record_session_operation("destroyed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn claims() -> VerifiedClaims {
        VerifiedClaims::new(
            "auth0|user-1",
            Some("alice@example.com".to_string()),
            vec!["api".to_string()],
            "https://idp.test/",
            Utc::now().timestamp() + 600,
            false,
        )
    }

    fn sessions(store: Arc<MemoryStore>) -> SessionStore {
        SessionStore::new(store, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_then_validate() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(Arc::clone(&store));

        let id = sessions.create(&claims()).await.unwrap();

        assert_eq!(id.len(), 64);
        assert!(sessions.validate(&id).await);

        let record: serde_json::Value =
            serde_json::from_str(&store.get(&format!("session:{id}")).unwrap()).unwrap();
        assert_eq!(record["subject"], "auth0|user-1");
        assert_eq!(
            record["expires_at"].as_i64().unwrap() - record["created_at"].as_i64().unwrap(),
            60
        );
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let sessions = sessions(Arc::new(MemoryStore::new()));

        let a = sessions.create(&claims()).await.unwrap();
        let b = sessions.create(&claims()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_destroy_invalidates_and_is_idempotent() {
        let sessions = sessions(Arc::new(MemoryStore::new()));
        let id = sessions.create(&claims()).await.unwrap();

        sessions.destroy(&id).await.unwrap();
        assert!(!sessions.validate(&id).await);

        sessions.destroy(&id).await.unwrap();
        assert!(!sessions.validate(&id).await);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_invalid() {
        let sessions = sessions(Arc::new(MemoryStore::new()));

        assert!(!sessions.validate("").await);
        assert!(!sessions.validate("never-issued").await);
        assert!(!sessions.validate("rl:10.0.0.1").await);
        assert!(!sessions.validate(&"a".repeat(500)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_ttl() {
        let sessions = sessions(Arc::new(MemoryStore::new()));
        let id = sessions.create(&claims()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!sessions.validate(&id).await);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_rejected() {
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()), Duration::MAX);

        assert!(matches!(
            sessions.create(&claims()).await,
            Err(GateError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions(Arc::clone(&store));
        let id = sessions.create(&claims()).await.unwrap();

        store.set_unavailable(true);

        assert!(!sessions.validate(&id).await);
        assert!(matches!(
            sessions.create(&claims()).await,
            Err(GateError::ServiceUnavailable(_))
        ));
        assert!(sessions.destroy(&id).await.is_err());
    }
}
