//! Error types for the worker and front door.

use thiserror::Error;

/// Failure modes the worker's handler can raise for one job.
///
/// The worker loop discriminates on the variant to choose ack+drop,
/// ack+retry, or ack+dead-letter -- see [`crate::worker::run`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The stream entry's `payload` field was not valid JSON, or was
    /// missing required fields. Terminal: acked and dropped, never
    /// retried or dead-lettered, since re-queueing an unparseable entry
    /// only loops.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A transient failure talking to the insights service or the
    /// stream backend.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The subject has image ids but none carry a usable embedding.
    #[error("no usable embeddings for subject")]
    EmptyEmbeddings,

    /// The clustering engine failed (a programmer-error precondition
    /// violation surfaced at the worker boundary).
    #[error("clustering failed: {0}")]
    ClusteringFailure(#[from] clustering_core::EngineError),

    /// Failed to persist `ClusterState` to the state store.
    #[error("failed to persist cluster state: {0}")]
    PersistFailure(String),

    /// Failed to write enriched quality metadata back to the insights
    /// service. Never fatal on its own -- logged and swallowed by the
    /// caller, kept here only so call sites can report it if they choose.
    #[error("insights write-back failed: {0}")]
    WriteBackFailure(String),
}
