//! Process-wide shared resources.
//!
//! Replaces the reference implementation's process-wide singletons (a
//! lazily-constructed Redis client, a module-level storage client) with
//! one explicit `AppContext` built in `main` and passed by reference to
//! the worker loop and HTTP handlers. No global mutable state.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use crate::config::AppConfig;
use crate::insights_client::{InsightsClient, InsightsProvider};
use crate::state_store::{RedisStateStore, StateStore};
use crate::stream::{RedisStreamQueue, StreamQueue};

/// Bundles the pooled resources shared across the worker loop and the
/// submission front door.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub stream: Arc<dyn StreamQueue>,
    pub state_store: Arc<dyn StateStore>,
    pub insights: Arc<dyn InsightsProvider>,
}

impl AppContext {
    /// Connects to Redis and builds the full set of adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial Redis connection cannot be
    /// established.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let manager_config = ConnectionManagerConfig::new().set_connection_timeout(
            Duration::from_secs_f64(config.redis_socket_connect_timeout),
        );
        let conn = ConnectionManager::new_with_config(client, manager_config).await?;

        let stream = Arc::new(RedisStreamQueue::new(
            conn.clone(),
            config.stream_key.clone(),
            config.dead_letter_stream.clone(),
            config.consumer_group.clone(),
            config.consumer_name.clone(),
            config.stream_maxlen,
            config.stream_approximate_trim,
        ));
        let state_store = Arc::new(RedisStateStore::new(conn));
        let insights = Arc::new(InsightsClient::new(
            &config.insights_base_url,
            config.internal_token.clone(),
            config.http_timeout_seconds,
        ));

        Ok(Self {
            config: Arc::new(config),
            stream,
            state_store,
            insights,
        })
    }
}
