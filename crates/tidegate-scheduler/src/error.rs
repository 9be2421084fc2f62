//! Scheduler error types.

use thiserror::Error;

use tidegate_core::LockTimeout;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} already exists")]
    DuplicateJob(u32),

    #[error("job not found: {0}")]
    JobNotFound(u32),

    #[error("invalid job {id}: {reason}")]
    InvalidJob { id: u32, reason: String },

    #[error("failed to launch job {id} ({filename}): {reason}")]
    Launch {
        id: u32,
        filename: String,
        reason: String,
    },

    #[error(transparent)]
    Lock(#[from] LockTimeout),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
