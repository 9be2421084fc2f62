//! tidegate-scheduler: periodic external jobs.
//!
//! The [`JobScheduler`] keeps the active job set and launches due jobs on
//! each tick. Its job list is the `scheduler` configuration domain: the
//! scheduler itself is that domain's runtime set, so jobs are loaded,
//! saved, checksummed, and synced through the reconciliation engine like
//! every other domain.
//!
//! ```text
//! JobScheduler
//!   ├── AdminLock<JobSet>   (ticks and edits are mutually exclusive)
//!   ├── JobLauncher         (ProcessLauncher: tokio::process, no shell)
//!   └── Notify              (edits wake the tick loop)
//! ```

pub mod error;
pub mod job;
pub mod launcher;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{LEGACY_ARGUMENT_SLOTS, ScheduledJob, SchedulerJob};
pub use launcher::{JobLauncher, ProcessLauncher};
pub use scheduler::{Clock, JobScheduler, SchedulerCounters};
