use thiserror::Error;

use tidegate_core::LockTimeout;
use tidegate_scheduler::SchedulerError;
use tidegate_state::{EngineError, StateError};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("failed to open table store: {0}")]
    Open(#[from] StateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Lock(#[from] LockTimeout),

    #[error("bootstrap failed for {failed} domain(s)")]
    Bootstrap { failed: usize },
}

pub type AdminResult<T> = Result<T, AdminError>;
