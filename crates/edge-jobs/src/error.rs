//! Error types for the job engine.

use crate::context::ContextError;
use crate::job::JobType;

/// Errors returned by [`Worker`](crate::Worker) operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("duplicate handler for job type {0}")]
    DuplicateHandler(JobType),

    #[error("handlers must be registered before start (job type {0})")]
    AlreadyStarted(JobType),

    #[error("worker already started")]
    StartedTwice,

    #[error("worker is stopped")]
    Stopped,

    #[error("worker pool size must be at least 1")]
    InvalidConfig,

    #[error("enqueue aborted: {0}")]
    Context(#[from] ContextError),
}

/// Result type for job engine operations.
pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_handler_names_the_type() {
        let err = JobError::DuplicateHandler(JobType::new("build"));
        assert!(err.to_string().contains("build"));
    }

    #[test]
    fn context_error_converts() {
        let err: JobError = ContextError::DeadlineExceeded.into();
        assert!(err.to_string().contains("deadline"));
    }
}
