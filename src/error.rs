//! Error taxonomy shared by every component of the execution core.
//!
//! Acquisition failures (`PoolExhausted`, `LockTimeout`) are surfaced to the caller and
//! leave the task in its prior state. `Interrupted` is cooperative cancellation and is
//! never logged as a failure.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("query {0} is closed")]
    QueryClosed(String),

    #[error("connection pool {pool}/{priority} exhausted")]
    PoolExhausted { pool: String, priority: String },

    #[error("unknown connection pool: {0}")]
    PoolUnknown(String),

    #[error("timed out waiting for lock {0}")]
    LockTimeout(String),

    #[error("no eligible ivarator cache directory")]
    NoEligibleDirectory,

    #[error("claim check {reference} could not be fetched: {reason}")]
    ClaimCheckFetchFailed { reference: String, reason: String },

    #[error("task store read failed: {0}")]
    StoreReadFailed(String),

    #[error("task store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("interrupted")]
    Interrupted,

    #[error("unknown query logic: {0}")]
    UnknownQueryLogic(String),

    #[error("collaborator failed: {0}")]
    CollaboratorFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Stable upper-case code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::UnknownQuery(_) => "UNKNOWN_QUERY",
            ExecutorError::UnknownTask(_) => "UNKNOWN_TASK",
            ExecutorError::QueryClosed(_) => "QUERY_CLOSED",
            ExecutorError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            ExecutorError::PoolUnknown(_) => "POOL_UNKNOWN",
            ExecutorError::LockTimeout(_) => "LOCK_TIMEOUT",
            ExecutorError::NoEligibleDirectory => "NO_ELIGIBLE_DIRECTORY",
            ExecutorError::ClaimCheckFetchFailed { .. } => "CLAIM_CHECK_FETCH_FAILED",
            ExecutorError::StoreReadFailed(_) => "STORE_READ_FAILED",
            ExecutorError::StoreWriteFailed(_) => "STORE_WRITE_FAILED",
            ExecutorError::Interrupted => "INTERRUPTED",
            ExecutorError::UnknownQueryLogic(_) => "UNKNOWN_QUERY_LOGIC",
            ExecutorError::CollaboratorFailed(_) => "COLLABORATOR_FAILED",
            ExecutorError::InvalidRequest(_) => "INVALID_REQUEST",
            ExecutorError::Internal(_) => "INTERNAL",
        }
    }

    /// Failures that leave the task queued so the monitor or the client can retry it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::PoolExhausted { .. }
                | ExecutorError::LockTimeout(_)
                | ExecutorError::StoreReadFailed(_)
        )
    }

    pub fn collaborator(err: anyhow::Error) -> Self {
        ExecutorError::CollaboratorFailed(format!("{:#}", err))
    }
}
