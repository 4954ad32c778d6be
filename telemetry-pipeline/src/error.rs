//! Error types shared by both pipelines.
//!
//! Errors are split by where they can surface:
//! - [`ConfigError`] while building a pipeline, before any telemetry is produced.
//! - [`CorrelationError`] when a span is ended out of order or twice.
//! - [`ExportError`] from an exporter; the batch processors log and count
//!   these, they never reach producers.
//! - [`PipelineError`] from `force_flush` and `shutdown`.
use crate::trace::SpanId;
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by flush and shutdown operations.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PipelineError {
    /// Shutdown has already been invoked.
    ///
    /// While shutdown is idempotent and calling it multiple times has no
    /// impact, this error suggests that another part of the application is
    /// invoking `shutdown` earlier than intended.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete within the configured grace period.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation failed due to an internal error.
    ///
    /// The error message is intended for logging purposes only and should not
    /// be used to make programmatic decisions.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for PipelineError {
    fn from(err: PoisonError<T>) -> Self {
        PipelineError::InternalFailure(format!("mutex poisoned: {err}"))
    }
}

/// Result of a flush or shutdown operation.
pub type PipelineResult = Result<(), PipelineError>;

/// Errors reported by an exporter for a single export attempt.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ExportError {
    /// The collector could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The collector answered but refused the payload.
    #[error("collector rejected the batch: {0}")]
    Rejected(String),

    /// The export did not finish within the per-export timeout.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    /// The batch could not be serialized into the wire format.
    #[error("failed to encode batch: {0}")]
    Encode(String),

    /// The exporter was used after it was shut down.
    #[error("exporter is already shut down")]
    AlreadyShutdown,
}

/// Result of a single export attempt.
pub type ExportResult = Result<(), ExportError>;

/// Errors raised while building a resource, an exporter or a pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A resource attribute is malformed.
    #[error("invalid resource attribute {key:?}: {reason}")]
    InvalidResource {
        /// The offending attribute key.
        key: String,
        /// Why the key was refused.
        reason: &'static str,
    },

    /// The collector endpoint is not a valid URI.
    #[error("invalid URI {0}. Reason {1}")]
    InvalidUri(String, String),

    /// A configured header cannot be sent.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// The requested protocol is unknown or its feature is disabled.
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),

    /// Invalid configuration.
    #[error("{name}: {reason}")]
    InvalidConfig {
        /// The configuration name.
        name: String,
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Spawning a background thread failed.
    #[error("Spawning a new thread failed: {0}")]
    ThreadSpawnFailed(String),
}

/// Errors raised when ending a span breaks the stack discipline of its
/// correlation context. The span is discarded in both cases.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CorrelationError {
    /// The span was already ended.
    #[error("span {0} was already ended")]
    AlreadyEnded(SpanId),

    /// The span is open but other spans opened after it are still open.
    #[error("span {0} is not the current span of its context")]
    NotCurrent(SpanId),
}
