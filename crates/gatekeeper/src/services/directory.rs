//! User-directory existence check.
//!
//! Queries `GET {base}/rest/v1/users?email=eq.{email}&select=email` with the
//! directory API key. A 200 with a non-empty array means the user exists.
//!
//! # Status Mapping
//!
//! | Directory response | Result |
//! |--------------------|--------|
//! | 200, non-empty array | `Ok(true)` |
//! | 200, empty array, 404, other 4xx | `Ok(false)` |
//! | 401, 403 (our key rejected) | `Err(Misconfigured)` |
//! | 5xx, transport error, timeout, bad body | `Err(Unavailable)` |
//!
//! Calls are never retried.

use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

/// Timeout for a single directory call.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory call failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory rejected our credentials (status {0})")]
    Misconfigured(u16),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Existence check against the user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, email: &str) -> Result<bool, DirectoryError>;
}

/// HTTP client for the user directory.
pub struct DirectoryClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl DirectoryClient {
    pub fn new(base_url: String, api_key: SecretString) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gatekeeper.directory", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn query(&self, email: &str) -> Result<bool, DirectoryError> {
        let url = format!("{}/rest/v1/users", self.base_url);
        let filter = format!("eq.{email}");

        let response = self
            .http_client
            .get(&url)
            .query(&[("email", filter.as_str()), ("select", "email")])
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {e}")
                };
                DirectoryError::Unavailable(reason)
            })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let rows: Vec<serde_json::Value> = response
                    .json()
                    .await
                    .map_err(|e| DirectoryError::Unavailable(format!("unparsable body: {e}")))?;
                Ok(!rows.is_empty())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(DirectoryError::Misconfigured(status.as_u16()))
            }
            s if s.is_server_error() => Err(DirectoryError::Unavailable(format!(
                "directory returned {s}"
            ))),
            s => {
                tracing::debug!(target: "gatekeeper.directory", status = %s, "Unexpected directory status, treating as not found");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl UserDirectory for DirectoryClient {
    #[instrument(skip_all)]
    async fn user_exists(&self, email: &str) -> Result<bool, DirectoryError> {
        let start = Instant::now();
        let result = self.query(email).await;

        let label = match &result {
            Ok(true) => "found",
            Ok(false) => "not_found",
            Err(DirectoryError::Misconfigured(_)) => "misconfigured",
            Err(DirectoryError::Unavailable(_)) => "unavailable",
        };
        metrics::record_directory_lookup(label, start.elapsed());

        if let Err(e) = &result {
            tracing::warn!(target: "gatekeeper.directory", error = %e, "Directory lookup failed");
        }
        result
    }
}

/// In-memory directory for unit tests.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock directory with a fixed user list or a fixed failure.
    pub struct MockDirectory {
        users: HashSet<String>,
        failure: Option<DirectoryError>,
        call_count: AtomicUsize,
    }

    impl MockDirectory {
        /// Directory containing exactly these emails.
        pub fn with_users(users: &[&str]) -> Self {
            Self {
                users: users.iter().map(|u| u.to_string()).collect(),
                failure: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Directory whose every call fails.
        pub fn failing(error: DirectoryError) -> Self {
            Self {
                users: HashSet::new(),
                failure: Some(error),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserDirectory for MockDirectory {
        async fn user_exists(&self, email: &str) -> Result<bool, DirectoryError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                Some(error) => Err(error.clone()),
                None => Ok(self.users.contains(email)),
            }
        }
    }
}
