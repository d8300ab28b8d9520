//! Plan application error types.

use thiserror::Error;

/// Result type alias for applier operations.
pub type ApplierResult<T> = Result<T, ApplierError>;

/// Errors surfaced by the replicated-log boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("log write failed: {0}")]
    Write(String),

    #[error("log commit timed out")]
    CommitTimeout,

    #[error("log engine closed")]
    Closed,
}

/// Errors in the batch wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("batch encode failed: {0}")]
    Encode(String),

    #[error("batch decode failed: {0}")]
    Decode(String),

    #[error("unsupported batch version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("batch entry truncated")]
    Truncated,
}

/// Errors returned to plan submitters.
///
/// A fully rejected plan is not an error: it comes back as a successful
/// empty result carrying a refresh index. `Clone` lets the applier replay
/// a stored fatal error to every subsequent caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplierError {
    /// The plan is structurally invalid; rejected before admission.
    #[error("invalid plan: {0}")]
    Validation(String),

    /// A recoverable log failure; the caller may retry against a fresh
    /// snapshot.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The applier's optimistic state can no longer be trusted to match
    /// the log. Terminal until process restart.
    #[error("applier in fatal state: {0}")]
    Fatal(String),

    /// The applier or its pool was shut down while work was in flight.
    #[error("applier shut down")]
    Shutdown,
}

impl ApplierError {
    /// Fatal errors poison the applier: every pending and future plan
    /// fails with the same error until restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplierError::Fatal(_))
    }
}
