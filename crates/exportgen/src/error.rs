//! Error types for export generation.
//!
//! ## Error Cases
//! - `InvalidRequest`: the request was rejected before any byte was produced.
//! - `GenerationAbort`: the sink failed mid-stream (client gone, reset). The
//!   partial output is unrecoverable.
//! - `ContainerIntegrity`: an internal invariant of the archive writer was
//!   violated. The central directory is never written after this.
//! - `Cancelled`: the pipeline was torn down from outside (server shutdown).

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the export pipeline.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The request parameters are out of bounds or malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Writing to the output sink failed.
    #[error("Generation aborted: {0}")]
    GenerationAbort(#[from] std::io::Error),

    /// The archive writer detected an inconsistent state.
    #[error("Container integrity violated: {reason}")]
    ContainerIntegrity { reason: String },

    /// The pipeline was cancelled before it completed.
    #[error("Export cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn integrity(reason: impl Into<String>) -> Self {
        Self::ContainerIntegrity {
            reason: reason.into(),
        }
    }
}
