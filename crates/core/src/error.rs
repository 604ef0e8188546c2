//! Core error model.

use thiserror::Error;

/// Result type used across the core layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Keep this focused on deterministic decision failures (validation, stream
/// addressing, versioning). Storage faults belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stream must be addressed by exactly one of id or name.
    #[error("either a stream id or a stream name is required (but not both)")]
    EitherStreamIdOrStreamNameIsRequired,

    /// An append was requested with an empty batch.
    #[error("no events to append")]
    NoEventsToAppend,

    /// `NoVersioning` was used on a stream that was written with explicit versions.
    #[error("no expected version given on a versioned stream")]
    NoExpectedVersionGivenOnVersionedStream,

    /// An explicit expected version was used on a stream written with `NoVersioning`.
    #[error("expected version used on a versionless stream")]
    ExpectedVersionUsedOnVersionlessStream,

    /// Optimistic concurrency check failed.
    #[error("concurrent stream write (actual version: {actual}, expected: {expected})")]
    Concurrency { actual: u64, expected: u64 },
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(actual: u64, expected: u64) -> Self {
        Self::Concurrency { actual, expected }
    }

    /// Concurrency conflicts are the only errors a caller may resolve by
    /// reloading and re-applying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// Permanent misuse of the API (never retried).
    pub fn is_misuse(&self) -> bool {
        !self.is_conflict()
    }
}
