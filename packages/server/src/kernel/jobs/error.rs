//! Error types for the job queue.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::ErrorKind;

/// Failure of a single job attempt.
///
/// The variant is chosen by the code that called the external operation;
/// the worker never classifies failures by looking at error text.
#[derive(Debug, Error)]
pub enum JobError {
    /// Network error, rate limit, upstream hiccup. Retried while attempts remain.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed input, unreachable target, authentication failure. Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The attempt ran longer than the job timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    /// The error kind recorded on the job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Transient(_) => ErrorKind::Retryable,
            JobError::Permanent(_) => ErrorKind::NonRetryable,
            JobError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Job store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database could not be reached or rejected the statement.
    #[error("job store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Admin re-trigger of a job that has not reached a terminal state.
    #[error("job {0} is not in a terminal state")]
    NotTerminal(Uuid),

    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for job store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
