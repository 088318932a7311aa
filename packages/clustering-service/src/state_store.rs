//! Redis-backed key/value TTL state store (C2).
//!
//! Keys are `"{namespace}:state:{subject_id}"` (see
//! [`crate::config::AppConfig::state_key`]); values are the JSON
//! encoding of `ClusterState`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};

use crate::error::JobError;

/// Key/value TTL operations backing per-subject cluster state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Writes `value` under `key`, expiring after `ttl_seconds`.
    async fn put_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), JobError>;

    /// Reads the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, JobError>;

    /// Deletes `key`, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, JobError>;
}

/// Redis-backed [`StateStore`].
pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(|e: RedisError| JobError::PersistFailure(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, JobError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e: RedisError| JobError::UpstreamUnavailable(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, JobError> {
        let mut conn = self.conn.clone();
        let deleted: u64 = conn
            .del(key)
            .await
            .map_err(|e: RedisError| JobError::UpstreamUnavailable(e.to_string()))?;
        Ok(deleted > 0)
    }
}
