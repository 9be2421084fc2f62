//! Scheduler job rows.

use serde::{Deserialize, Serialize};

use tidegate_core::{ArgumentMode, ConfigDomain};
use tidegate_state::DomainRow;

/// Argument slots of the historical fixed-width row layout.
pub const LEGACY_ARGUMENT_SLOTS: usize = 5;

/// A periodic external job, as persisted and reconciled.
///
/// Run timestamps are deliberately not part of the row: they change on
/// every tick and would churn the domain checksum. See [`ScheduledJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JobWire")]
pub struct SchedulerJob {
    pub id: u32,
    pub active: bool,
    pub interval_ms: u64,
    /// Executable path, invoked directly without a shell.
    pub filename: String,
    /// Positional arguments, passed verbatim.
    pub arguments: Vec<String>,
    pub comment: String,
}

/// Accepted on-disk shapes: the current `arguments` list, or the legacy
/// `arg1`..`arg5` columns.
#[derive(Deserialize)]
struct JobWire {
    id: u32,
    #[serde(default = "default_active")]
    active: bool,
    interval_ms: u64,
    filename: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    arg1: Option<String>,
    #[serde(default)]
    arg2: Option<String>,
    #[serde(default)]
    arg3: Option<String>,
    #[serde(default)]
    arg4: Option<String>,
    #[serde(default)]
    arg5: Option<String>,
    #[serde(default)]
    comment: String,
}

fn default_active() -> bool {
    true
}

impl From<JobWire> for SchedulerJob {
    fn from(wire: JobWire) -> Self {
        let arguments = if wire.arguments.is_empty() {
            // The argument list ends at the first empty column.
            [wire.arg1, wire.arg2, wire.arg3, wire.arg4, wire.arg5]
                .into_iter()
                .map_while(|arg| arg)
                .collect()
        } else {
            wire.arguments
        };
        Self {
            id: wire.id,
            active: wire.active,
            interval_ms: wire.interval_ms,
            filename: wire.filename,
            arguments,
            comment: wire.comment,
        }
    }
}

impl SchedulerJob {
    pub fn new(id: u32, interval_ms: u64, filename: impl Into<String>) -> Self {
        Self {
            id,
            active: true,
            interval_ms,
            filename: filename.into(),
            arguments: Vec::new(),
            comment: String::new(),
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Checks that depend on the configured argument mode.
    pub fn check_mode(&self, mode: ArgumentMode) -> Result<(), String> {
        if mode == ArgumentMode::Legacy5 && self.arguments.len() > LEGACY_ARGUMENT_SLOTS {
            return Err(format!(
                "{} arguments exceed the {LEGACY_ARGUMENT_SLOTS}-argument limit",
                self.arguments.len()
            ));
        }
        Ok(())
    }
}

impl DomainRow for SchedulerJob {
    const DOMAIN: ConfigDomain = ConfigDomain::Scheduler;

    fn primary_key(&self) -> String {
        format!("{:010}", self.id)
    }

    fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than zero".into());
        }
        if self.filename.trim().is_empty() {
            return Err("filename is empty".into());
        }
        Ok(())
    }
}

/// A job in the scheduler's active set, with its runtime-only timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub job: SchedulerJob,
    /// Last launch time in epoch ms; 0 if never launched.
    pub last_run_ts: u64,
    pub next_run_ts: u64,
}

impl ScheduledJob {
    /// A freshly loaded job is due immediately.
    pub fn new(job: SchedulerJob, now_ms: u64) -> Self {
        Self {
            job,
            last_run_ts: 0,
            next_run_ts: now_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.job.active && self.next_run_ts <= now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegate_state::decode_row;

    #[test]
    fn legacy_columns_become_ordered_arguments() {
        let json = br#"{"id":7,"active":true,"interval_ms":1000,"filename":"/usr/bin/backup",
            "arg1":"--full","arg2":"/data","arg3":null,"arg4":null,"arg5":null,"comment":"nightly"}"#;
        let job: SchedulerJob = decode_row(json).unwrap();
        assert_eq!(job.arguments, vec!["--full", "/data"]);
        assert_eq!(job.comment, "nightly");

        // Re-encoding uses the current layout.
        let text = serde_json::to_string(&job).unwrap();
        assert!(text.contains("\"arguments\":[\"--full\",\"/data\"]"));
        assert!(!text.contains("arg1"));
    }

    #[test]
    fn legacy_arguments_stop_at_the_first_null_column() {
        let json = br#"{"id":8,"interval_ms":1000,"filename":"/usr/bin/check",
            "arg1":"a","arg2":null,"arg3":"c","arg4":null,"arg5":null}"#;
        let job: SchedulerJob = decode_row(json).unwrap();
        assert_eq!(job.arguments, vec!["a"]);
    }

    #[test]
    fn zero_interval_and_empty_filename_are_invalid() {
        assert!(SchedulerJob::new(1, 0, "/bin/true").validate().is_err());
        assert!(SchedulerJob::new(1, 1000, "  ").validate().is_err());
        assert!(SchedulerJob::new(1, 1000, "/bin/true").validate().is_ok());
    }

    #[test]
    fn legacy_mode_caps_argument_count() {
        let job = SchedulerJob::new(3, 500, "/bin/echo").with_arguments(["1", "2", "3", "4", "5", "6"]);
        assert!(job.check_mode(ArgumentMode::Legacy5).is_err());
        assert!(job.check_mode(ArgumentMode::Unbounded).is_ok());
    }

    #[test]
    fn primary_key_sorts_numerically() {
        let a = SchedulerJob::new(9, 1, "x").primary_key();
        let b = SchedulerJob::new(10, 1, "x").primary_key();
        assert!(a < b);
    }

    #[test]
    fn fresh_entry_is_due_at_load_time() {
        let entry = ScheduledJob::new(SchedulerJob::new(1, 1000, "/bin/true"), 5_000);
        assert!(entry.is_due(5_000));
        assert!(!entry.is_due(4_999));
    }
}
