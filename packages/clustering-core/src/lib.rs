//! Pet media clustering core -- domain types and the density-based
//! clustering engine.
//!
//! This crate is the pure, synchronous foundation of the clustering
//! pipeline:
//!
//! - **Model** ([`model`]): `JobEnvelope`, `InsightRecord`, `Cluster`,
//!   `ClusterState`, and the `ClusteringMode` label tables
//! - **Engine** ([`engine`]): [`engine::cluster`], the density-based
//!   clustering function consumed by the worker
//! - **Error** ([`error`]): `EngineError`, the engine's only failure mode
//!
//! Nothing in this crate performs I/O; Redis, HTTP, and the submission
//! front door all live in `clustering-service`.

pub mod engine;
pub mod error;
pub mod model;

pub use engine::{cluster, ClusterParams};
pub use error::EngineError;
pub use model::{
    Cluster, ClusterMember, ClusterMetrics, ClusterState, ClusteringMode, InsightRecord,
    JobEnvelope,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    #[test]
    fn reexports_accessible() {
        let _ = ClusteringMode::Identity.label_for(0);
        let _ = ClusterParams::default();
        let _ = EngineError::InvalidInput(1, 2);
        let envelope = JobEnvelope::new(None, "subject-1".to_string(), serde_json::json!({}));
        assert_eq!(envelope.attempts, 0);
        let _ = InsightRecord::default();
    }
}
