//! Redis Streams-backed job queue adapter (C1).
//!
//! Thin wrapper over `XADD`/`XREADGROUP`/`XACK`/`XPENDING`. The adapter
//! never retries a failed Redis call itself -- the worker loop owns
//! failure policy (see [`crate::worker`]).

use async_trait::async_trait;
use clustering_core::JobEnvelope;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tracing::warn;

use crate::error::JobError;

/// One entry read back from the stream: its id and the raw `payload` field.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub payload: Option<String>,
}

/// Consumer-group pending-entries summary, for telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingSummary {
    pub count: u64,
}

/// Operations the worker loop and front door need from the job stream.
///
/// Implemented against Redis by [`RedisStreamQueue`]; kept as a trait so
/// the worker's handler logic can be exercised against a fake in tests.
#[async_trait]
pub trait StreamQueue: Send + Sync {
    /// Idempotently creates the consumer group at stream origin
    /// (`id = "0"`), creating the stream if it does not exist. Treats
    /// "group already exists" as success.
    async fn ensure_group(&self) -> Result<(), JobError>;

    /// Appends `envelope` to the main stream, approximately trimmed to
    /// the configured `maxlen`.
    async fn publish(&self, envelope: &JobEnvelope) -> Result<(), JobError>;

    /// Reads up to `count` new (`">"`) entries for this consumer,
    /// blocking up to `block_ms`. Returns an empty vec on timeout.
    async fn read_group(&self, count: u64, block_ms: u64) -> Result<Vec<StreamEntry>, JobError>;

    /// Marks `entry_id` as processed for this consumer group.
    async fn ack(&self, entry_id: &str) -> Result<(), JobError>;

    /// Appends `envelope` plus the stringified `error` to the dead-letter
    /// stream.
    async fn dead_letter_publish(&self, envelope: &JobEnvelope, error: &str) -> Result<(), JobError>;

    /// Current consumer-group pending-entry count. Returns a zeroed
    /// summary if the backend does not support pending inspection.
    async fn pending_summary(&self) -> PendingSummary;

    /// Idle time, in milliseconds, of the oldest pending entry. Returns 0
    /// if unavailable.
    async fn oldest_pending_idle_ms(&self) -> u64;
}

/// Redis-backed [`StreamQueue`].
pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream_key: String,
    dead_letter_stream: String,
    consumer_group: String,
    consumer_name: String,
    maxlen: StreamMaxlen,
}

impl RedisStreamQueue {
    #[must_use]
    pub fn new(
        conn: ConnectionManager,
        stream_key: String,
        dead_letter_stream: String,
        consumer_group: String,
        consumer_name: String,
        maxlen: u64,
        approximate_trim: bool,
    ) -> Self {
        let maxlen = if approximate_trim {
            StreamMaxlen::Approx(maxlen as usize)
        } else {
            StreamMaxlen::Equals(maxlen as usize)
        };
        Self {
            conn,
            stream_key,
            dead_letter_stream,
            consumer_group,
            consumer_name,
            maxlen,
        }
    }

    async fn xadd(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        conn.xadd_maxlen::<_, _, _, _, ()>(key, self.maxlen, "*", fields)
            .await
            .map_err(|e: RedisError| JobError::UpstreamUnavailable(e.to_string()))
    }
}

#[async_trait]
impl StreamQueue for RedisStreamQueue {
    async fn ensure_group(&self) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.consumer_group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(JobError::UpstreamUnavailable(e.to_string())),
        }
    }

    async fn publish(&self, envelope: &JobEnvelope) -> Result<(), JobError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| JobError::UpstreamUnavailable(e.to_string()))?;
        self.xadd(&self.stream_key, &[("payload", payload.as_str())])
            .await
    }

    async fn read_group(&self, count: u64, block_ms: u64) -> Result<Vec<StreamEntry>, JobError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.consumer_group, &self.consumer_name)
            .count(count as usize)
            .block(block_ms as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e: RedisError| JobError::UpstreamUnavailable(e.to_string()))?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let payload = id
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok());
                entries.push(StreamEntry {
                    id: id.id,
                    payload,
                });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, ()>(&self.stream_key, &self.consumer_group, &[entry_id])
            .await
            .map_err(|e: RedisError| JobError::UpstreamUnavailable(e.to_string()))
    }

    async fn dead_letter_publish(&self, envelope: &JobEnvelope, error: &str) -> Result<(), JobError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| JobError::UpstreamUnavailable(e.to_string()))?;
        self.xadd(
            &self.dead_letter_stream,
            &[("payload", payload.as_str()), ("error", error)],
        )
        .await
    }

    async fn pending_summary(&self) -> PendingSummary {
        let mut conn = self.conn.clone();
        let reply: Result<redis::streams::StreamPendingReply, RedisError> =
            conn.xpending(&self.stream_key, &self.consumer_group).await;

        match reply {
            Ok(redis::streams::StreamPendingReply::Data(data)) => PendingSummary {
                count: data.count as u64,
            },
            Ok(redis::streams::StreamPendingReply::Empty) => PendingSummary::default(),
            Err(e) => {
                warn!(error = %e, "pending summary unavailable, reporting zero");
                PendingSummary::default()
            }
        }
    }

    async fn oldest_pending_idle_ms(&self) -> u64 {
        let mut conn = self.conn.clone();
        let reply: Result<redis::streams::StreamPendingCountReply, RedisError> = conn
            .xpending_count(&self.stream_key, &self.consumer_group, "-", "+", 1)
            .await;

        match reply {
            Ok(reply) => reply
                .ids
                .first()
                .map_or(0, |id| id.last_delivery_time as u64),
            Err(e) => {
                warn!(error = %e, "oldest-pending inspection unavailable, reporting zero");
                0
            }
        }
    }
}
