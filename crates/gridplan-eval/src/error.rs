//! Evaluation error types.

use thiserror::Error;

/// Result type alias for evaluation operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that can occur while evaluating a plan.
///
/// Feasibility rejections are not errors; they surface through
/// [`crate::NodeFit`] and the result's refresh index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("evaluate pool is shut down")]
    PoolClosed,

    #[error("evaluate worker dropped a pending fit check")]
    WorkerLost,
}
