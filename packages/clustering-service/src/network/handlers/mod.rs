//! HTTP handler definitions for the submission front door.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod cluster_jobs;
pub mod health;

pub use cluster_jobs::{invalidate_clusters, read_clusters, submit_cluster_job};
pub use health::{health_handler, liveness_handler, readiness_handler, stream_health_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::context::AppContext;
use crate::network::ShutdownController;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// The full set of pooled adapters (stream, state store, insights client).
    pub ctx: AppContext,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl std::ops::Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}
