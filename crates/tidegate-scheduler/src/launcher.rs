//! Job launching.
//!
//! Launches are fire-and-forget: the scheduler never waits on a job, never
//! inspects its exit status, and never cancels it.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::SchedulerJob;

/// Starts a job's executable.
///
/// Implementations must return promptly; the scheduler calls `launch`
/// while holding its job lock.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, job: &SchedulerJob) -> SchedulerResult<()>;
}

/// Spawns jobs as child processes on the current tokio runtime.
///
/// The executable is invoked directly with the job's arguments (no shell),
/// with stdin closed. Each child is reaped by a detached task.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl JobLauncher for ProcessLauncher {
    fn launch(&self, job: &SchedulerJob) -> SchedulerResult<()> {
        let failed = |reason: String| SchedulerError::Launch {
            id: job.id,
            filename: job.filename.clone(),
            reason,
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| failed(e.to_string()))?;
        let _enter = runtime.enter();

        let mut child = Command::new(&job.filename)
            .args(&job.arguments)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| failed(e.to_string()))?;

        let id = job.id;
        debug!(job = id, pid = ?child.id(), filename = %job.filename, "job launched");
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(job = id, %status, "job exited"),
                Err(e) => warn!(job = id, error = %e, "failed to reap job"),
            }
        });
        Ok(())
    }
}
