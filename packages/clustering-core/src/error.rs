//! Error types for the pure clustering engine.

use thiserror::Error;

/// Errors raised by [`crate::engine::cluster`].
///
/// The engine is a pure function; the only failure mode is a caller
/// contract violation, which is always a programmer error rather than a
/// transient condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// `image_ids.len() != embeddings.len()`.
    #[error("invalid input: {0} image ids but {1} embedding vectors")]
    InvalidInput(usize, usize),
}
