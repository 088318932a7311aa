//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` allocates shared
//! state, `start()` binds the TCP listener, and `serve()` starts
//! accepting connections.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::auth::require_internal_token;
use super::handlers::{
    health_handler, invalidate_clusters, liveness_handler, read_clusters, readiness_handler,
    stream_health_handler, submit_cluster_job, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::context::AppContext;

/// Manages the full HTTP server lifecycle for the submission front door.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    ctx: AppContext,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /healthz` -- unauthenticated liveness-style health JSON
    /// - `GET /internal/health/stream` -- stream reachability, 200/503
    /// - `POST /internal/cluster-jobs` -- enqueue a job envelope
    /// - `GET /internal/pets/{subject_id}/clusters` -- read persisted state
    /// - `POST /internal/pets/{subject_id}/invalidate` -- drop persisted state
    ///
    /// All `/internal/*` routes require a valid `X-Internal-Token` header.
    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(self.ctx.clone(), Arc::clone(&self.shutdown))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.ctx.config.http_host, self.ctx.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(%addr, "front-door listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let router = build_router(self.ctx, Arc::clone(&self.shutdown));

        self.shutdown.set_ready();

        info!("serving front-door HTTP connections");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown.trigger_shutdown();
        Ok(())
    }
}

fn build_router(ctx: AppContext, shutdown: Arc<ShutdownController>) -> Router {
    let state = AppState {
        ctx: ctx.clone(),
        shutdown,
        start_time: Instant::now(),
    };

    let internal_routes = Router::new()
        .route("/health/stream", get(stream_health_handler))
        .route("/cluster-jobs", post(submit_cluster_job))
        .route("/pets/{subject_id}/clusters", get(read_clusters))
        .route("/pets/{subject_id}/invalidate", post(invalidate_clusters))
        .route_layer(from_fn_with_state(state.clone(), require_internal_token));

    let timeout = ctx.config.request_timeout_seconds;

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/healthz/live", get(liveness_handler))
        .route("/healthz/ready", get(readiness_handler))
        .nest("/internal", internal_routes)
        .layer(build_http_layers(timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::insights_client::{InsightUpdate, InsightsProvider};
    use crate::state_store::StateStore;
    use crate::stream::{PendingSummary, StreamEntry, StreamQueue};
    use async_trait::async_trait;
    use clap::Parser;
    use clustering_core::{InsightRecord, JobEnvelope};
    use std::collections::HashMap;

    struct NoopStream;
    #[async_trait]
    impl StreamQueue for NoopStream {
        async fn ensure_group(&self) -> Result<(), crate::error::JobError> {
            Ok(())
        }
        async fn publish(&self, _e: &JobEnvelope) -> Result<(), crate::error::JobError> {
            Ok(())
        }
        async fn read_group(&self, _c: u64, _b: u64) -> Result<Vec<StreamEntry>, crate::error::JobError> {
            Ok(Vec::new())
        }
        async fn ack(&self, _id: &str) -> Result<(), crate::error::JobError> {
            Ok(())
        }
        async fn dead_letter_publish(&self, _e: &JobEnvelope, _err: &str) -> Result<(), crate::error::JobError> {
            Ok(())
        }
        async fn pending_summary(&self) -> PendingSummary {
            PendingSummary::default()
        }
        async fn oldest_pending_idle_ms(&self) -> u64 {
            0
        }
    }

    struct NoopStateStore;
    #[async_trait]
    impl StateStore for NoopStateStore {
        async fn put_with_ttl(&self, _k: &str, _v: &str, _t: u64) -> Result<(), crate::error::JobError> {
            Ok(())
        }
        async fn get(&self, _k: &str) -> Result<Option<String>, crate::error::JobError> {
            Ok(None)
        }
        async fn delete(&self, _k: &str) -> Result<bool, crate::error::JobError> {
            Ok(false)
        }
    }

    struct NoopInsights;
    #[async_trait]
    impl InsightsProvider for NoopInsights {
        async fn list_images_with_embeddings(&self, _s: &str) -> Vec<String> {
            Vec::new()
        }
        async fn fetch_insights_batch(&self, _ids: &[String]) -> HashMap<String, InsightRecord> {
            HashMap::new()
        }
        async fn post_insights_batch(&self, _u: &[InsightUpdate]) {}
    }

    fn test_ctx() -> AppContext {
        AppContext {
            config: Arc::new(AppConfig::parse_from(["cluster-api"])),
            stream: Arc::new(NoopStream),
            state_store: Arc::new(NoopStateStore),
            insights: Arc::new(NoopInsights),
        }
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(test_ctx());
        assert!(module.listener.is_none());
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let module = NetworkModule::new(test_ctx());
        let s1 = module.shutdown_controller();
        let s2 = module.shutdown_controller();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[test]
    fn build_router_creates_router() {
        let module = NetworkModule::new(test_ctx());
        let _router = module.build_router();
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut config = AppConfig::parse_from(["cluster-api"]);
        config.http_port = 0;
        let ctx = AppContext {
            config: Arc::new(config),
            stream: Arc::new(NoopStream),
            state_store: Arc::new(NoopStateStore),
            insights: Arc::new(NoopInsights),
        };
        let mut module = NetworkModule::new(ctx);
        let port = module.start().await.expect("start should succeed");
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    #[should_panic(expected = "start() must be called before serve()")]
    async fn serve_panics_without_start() {
        let module = NetworkModule::new(test_ctx());
        let _ = module.serve(std::future::pending::<()>()).await;
    }
}
