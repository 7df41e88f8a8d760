//! Error taxonomy for the diagnosis pipeline.
//!
//! Core modules return [`Result`] over [`Error`]. The CLI and config layers
//! wrap these in `anyhow` at the edges.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Something the caller asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// One of the two index artifacts is absent. Run `rca index build`.
    #[error("index artifact missing: {} (run `rca index build`)", .0.display())]
    ArtifactMissing(PathBuf),

    /// A log backend, embedding provider, or reasoning service failed.
    #[error("{service} failed: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// An external call exceeded its deadline.
    #[error("{service} timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    /// Snippets and vectors are out of lockstep, or a vector has the wrong
    /// dimensionality or comes from a different model.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// A chunk is still above the provider's hard ceiling after splitting.
    #[error("chunk too large: {tokens} tokens exceeds ceiling of {ceiling}")]
    ChunkTooLarge { tokens: usize, ceiling: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an [`Error::ExternalService`].
    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        Error::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::ArtifactMissing(_) => "index_unavailable",
            Error::ExternalService { .. } => "external_service",
            Error::Timeout { .. } => "timeout",
            Error::ConsistencyViolation(_) => "consistency_violation",
            Error::ChunkTooLarge { .. } => "chunk_too_large",
            Error::InvalidRequest(_) => "bad_request",
            Error::Io(_) | Error::Json(_) => "internal",
        }
    }
}
