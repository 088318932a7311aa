//! Process configuration for the worker and front-door binaries.
//!
//! Every field has a default matching the reference deployment; all are
//! overridable via environment variable or CLI flag through [`clap`]'s
//! `env` attribute, so the same binary runs unmodified in a container
//! with only environment variables set.

use clap::Parser;

/// Configuration shared by `cluster-worker` and `cluster-api`.
///
/// Only one binary reads the fields it needs; harmless unused fields
/// (e.g. `metrics_port` in `cluster-api`) keep both binaries configurable
/// from a single flattened environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "media-clustering", version, about)]
pub struct AppConfig {
    /// Deployment environment label, surfaced in logs only.
    #[arg(long, env = "ENVIRONMENT", default_value = "local")]
    pub environment: String,

    /// Redis connection URL (stream, consumer group, and state store all
    /// live on the same instance).
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    pub redis_url: String,

    /// Seconds allowed for the initial TCP connect (and each reconnect)
    /// to Redis before `ConnectionManager` gives up on that attempt.
    #[arg(long, env = "REDIS_SOCKET_CONNECT_TIMEOUT", default_value_t = 5.0)]
    pub redis_socket_connect_timeout: f64,

    /// Namespace prefix for state-store keys: `"{namespace}:state:{subject_id}"`.
    #[arg(long, env = "NAMESPACE", default_value = "sploot.media.clusters")]
    pub namespace: String,

    /// Main job stream key.
    #[arg(long, env = "STREAM_KEY", default_value = "streams:media.cluster")]
    pub stream_key: String,

    /// Dead-letter stream key.
    #[arg(
        long,
        env = "DEAD_LETTER_STREAM",
        default_value = "streams:media.cluster.deadletter"
    )]
    pub dead_letter_stream: String,

    /// Approximate maximum stream length before trimming.
    #[arg(long, env = "STREAM_MAXLEN", default_value_t = 10_000)]
    pub stream_maxlen: u64,

    /// Whether stream trimming is approximate (`~`) or exact.
    #[arg(long, env = "STREAM_APPROXIMATE_TRIM", default_value_t = true)]
    pub stream_approximate_trim: bool,

    /// Consumer-group name shared by all worker processes.
    #[arg(
        long,
        env = "CONSUMER_GROUP",
        default_value = "media-clustering-workers"
    )]
    pub consumer_group: String,

    /// This process's consumer name within the group.
    #[arg(
        long,
        env = "CONSUMER_NAME",
        default_value = "media-clustering-worker"
    )]
    pub consumer_name: String,

    /// Milliseconds `XREADGROUP` blocks waiting for new entries.
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 5_000)]
    pub read_timeout_ms: u64,

    /// Maximum entries requested per `XREADGROUP` call.
    #[arg(long, env = "READ_COUNT", default_value_t = 16)]
    pub read_count: u64,

    /// Attempts before an envelope is routed to the dead-letter stream.
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// TTL applied to persisted `ClusterState` entries.
    #[arg(long, env = "STATE_TTL_SECONDS", default_value_t = 86_400)]
    pub state_ttl_seconds: u64,

    /// Per-cluster member cap after ranking.
    #[arg(long, env = "MAX_CLUSTER_SIZE", default_value_t = 24)]
    pub max_cluster_size: usize,

    /// Cosine-distance radius for pose-mode clustering.
    #[arg(long, env = "EPS", default_value_t = 0.3)]
    pub eps: f64,

    /// Cosine-distance radius for identity-mode clustering.
    #[arg(long, env = "IDENTITY_EPS", default_value_t = 0.15)]
    pub identity_eps: f64,

    /// Minimum neighborhood size (including the point itself) to seed a
    /// cluster.
    #[arg(long, env = "MIN_SAMPLES", default_value_t = 2)]
    pub min_samples: usize,

    /// Base URL of the external insights service.
    #[arg(long, env = "INSIGHTS_BASE_URL", default_value = "http://127.0.0.1:8000")]
    pub insights_base_url: String,

    /// Bearer token presented to the insights service.
    #[arg(long, env = "INTERNAL_TOKEN", default_value = "changeme")]
    pub internal_token: String,

    /// Timeout applied to each outbound insights HTTP call.
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 10)]
    pub http_timeout_seconds: u64,

    /// Whether the Prometheus exporter is started.
    #[arg(long, env = "METRICS_ENABLED", default_value_t = true)]
    pub metrics_enabled: bool,

    /// Port the worker's metrics exporter listens on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9105)]
    pub metrics_port: u16,

    /// Bind host for the submission front door.
    #[arg(long, env = "HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    /// Bind port for the submission front door.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Maximum time to let a front-door request run before returning 408.
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value_t = 30)]
    pub request_timeout_seconds: u64,
}

impl AppConfig {
    /// `{namespace}:state:{subject_id}`, the state-store key for a subject.
    #[must_use]
    pub fn state_key(&self, subject_id: &str) -> String {
        format!("{}:state:{subject_id}", self.namespace)
    }
}
