//! Redis-backed [`SharedStore`].
//!
//! Uses a `ConnectionManager`, which is cheap to clone and reconnects on its
//! own after a dropped connection. Every command is bounded by
//! [`OPERATION_TIMEOUT`]; a timeout is reported like any other store failure.
//!
//! The sliding-window update is a single `MULTI`/`EXEC` pipeline so
//! concurrent requests from several instances cannot interleave between the
//! prune, count and add.

use super::{SharedStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Upper bound for a single store round-trip.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.expose_secret()).map_err(|e| {
            // Do NOT log the URL: it may embed a password.
            error!(target: "gatekeeper.store.redis", error = %e, "Failed to open Redis client");
            StoreError::Backend(format!("failed to open client: {e}"))
        })?;

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                error!(target: "gatekeeper.store.redis", "Timed out connecting to Redis");
                StoreError::Timeout("connect")
            })?
            .map_err(|e| {
                error!(target: "gatekeeper.store.redis", error = %e, "Failed to connect to Redis");
                StoreError::Backend(format!("failed to connect: {e}"))
            })?;

        Ok(Self { connection })
    }
}

async fn bounded<T>(
    operation: &'static str,
    command: impl Future<Output = RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(OPERATION_TIMEOUT, command).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(target: "gatekeeper.store.redis", operation, error = %e, "Redis command failed");
            Err(StoreError::Backend(format!("{operation}: {e}")))
        }
        Err(_) => {
            warn!(target: "gatekeeper.store.redis", operation, "Redis command timed out");
            Err(StoreError::Timeout(operation))
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    #[instrument(skip_all)]
    async fn record_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let cutoff = now - window.as_secs_f64();
        // EXPIRE takes whole seconds; never let a sub-second window round to 0.
        let expire_secs = window.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(cutoff)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(expire_secs)
            .ignore();

        let (count,): (u64,) = bounded("record_hit", pipe.query_async(&mut conn)).await?;
        Ok(count)
    }

    #[instrument(skip_all)]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl.as_secs().max(1));

        let _: () = bounded("set_with_ttl", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);

        let count: u64 = bounded("exists", cmd.query_async(&mut conn)).await?;
        Ok(count > 0)
    }

    #[instrument(skip_all)]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);

        let _: u64 = bounded("delete", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("PING");

        let _: String = bounded("ping", cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_rejected_without_leaking() {
        let url = SecretString::from("not-a-redis-url://:hunter2@host");
        let err = RedisStore::connect(&url).await.err().unwrap();

        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_bounded_maps_command_errors() {
        let failing = async {
            Err::<(), _>(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection reset",
            )))
        };

        let err = bounded("ping", failing).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(ref m) if m.starts_with("ping")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let hanging = std::future::pending::<RedisResult<()>>();

        let err = bounded("ping", hanging).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout("ping"));
    }
}
