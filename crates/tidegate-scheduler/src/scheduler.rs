//! JobScheduler: dispatches due jobs on each tick.
//!
//! The job set sits behind one [`AdminLock`]. A tick takes the write side
//! for its whole pass, so structural edits (add, enable/disable, remove)
//! and dispatch never interleave: a job cannot fire half-edited.
//!
//! Launching only spawns; it never waits. A hung job has no effect on
//! other jobs or on later ticks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use tidegate_core::{
    AdminLock, ArgumentMode, LockSettings, LockTimeout, SchedulerConfig, epoch_millis,
};
use tidegate_state::{DomainRow, RuntimeTarget};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{ScheduledJob, SchedulerJob};
use crate::launcher::JobLauncher;

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Default)]
struct JobSet {
    jobs: BTreeMap<u32, ScheduledJob>,
    /// Bumped on every structural change.
    version: u64,
    /// Active job ids in dispatch order, valid for `order_version`.
    order: Vec<u32>,
    order_version: Option<u64>,
}

impl JobSet {
    fn changed(&mut self) {
        self.version += 1;
    }
}

#[derive(Debug, Default)]
struct SchedulerStats {
    ticks: AtomicU64,
    launches: AtomicU64,
    launch_failures: AtomicU64,
    rejected_jobs: AtomicU64,
    order_rebuilds: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerCounters {
    pub ticks: u64,
    pub launches: u64,
    pub launch_failures: u64,
    pub rejected_jobs: u64,
    pub order_rebuilds: u64,
}

pub struct JobScheduler {
    jobs: AdminLock<JobSet>,
    launcher: Arc<dyn JobLauncher>,
    argument_mode: ArgumentMode,
    max_idle: Duration,
    clock: Clock,
    wake: Notify,
    stats: SchedulerStats,
}

impl JobScheduler {
    pub fn new(
        settings: LockSettings,
        config: &SchedulerConfig,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            jobs: settings.build("scheduler", JobSet::default()),
            launcher,
            argument_mode: config.argument_mode,
            max_idle: Duration::from_millis(config.max_idle_ms),
            clock: Arc::new(epoch_millis),
            wake: Notify::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Replace the wall clock (tests, simulations).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    fn check_job(&self, job: &SchedulerJob) -> Result<(), String> {
        job.validate()?;
        job.check_mode(self.argument_mode)
    }

    // ── Ticks ────────────────────────────────────────────────────

    /// One tick at the current time.
    pub fn run_once(&self) -> SchedulerResult<Option<u64>> {
        self.run_once_at(self.now())
    }

    /// Launch every active job due at `now_ms` and reschedule it.
    ///
    /// Returns the earliest `next_run_ts` across active jobs, or `None`
    /// when nothing is active.
    pub fn run_once_at(&self, now_ms: u64) -> SchedulerResult<Option<u64>> {
        let mut guard = self.jobs.write()?;
        let set = &mut *guard;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if set.order_version != Some(set.version) {
            set.order = set
                .jobs
                .values()
                .filter(|entry| entry.job.active)
                .map(|entry| entry.job.id)
                .collect();
            set.order_version = Some(set.version);
            self.stats.order_rebuilds.fetch_add(1, Ordering::Relaxed);
            debug!(version = set.version, active = set.order.len(), "dispatch order rebuilt");
        }

        let mut next_due: Option<u64> = None;
        for id in &set.order {
            let Some(entry) = set.jobs.get_mut(id) else {
                continue;
            };
            if entry.is_due(now_ms) {
                match self.launcher.launch(&entry.job) {
                    Ok(()) => {
                        self.stats.launches.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.stats.launch_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(job = *id, error = %e, "job launch failed");
                    }
                }
                entry.last_run_ts = now_ms;
                entry.next_run_ts = now_ms.saturating_add(entry.job.interval_ms);
            }
            next_due = Some(next_due.map_or(entry.next_run_ts, |n| n.min(entry.next_run_ts)));
        }
        Ok(next_due)
    }

    /// Drive ticks until shutdown.
    ///
    /// Sleeps until the earliest due job, at most `max_idle`, and wakes
    /// early whenever the job set is edited.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(max_idle_ms = self.max_idle.as_millis() as u64, "job scheduler started");

        loop {
            let now = self.now();
            let idle = match self.run_once_at(now) {
                Ok(next) => idle_for(next, now, self.max_idle),
                Err(e) => {
                    warn!(error = %e, "scheduler tick skipped");
                    self.max_idle
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = self.wake.notified() => {
                    debug!("scheduler woken by job edit");
                }
                _ = shutdown.changed() => {
                    info!("job scheduler shutting down");
                    break;
                }
            }
        }
    }

    // ── Structural edits ─────────────────────────────────────────

    /// Add a job, due immediately. An existing id wins.
    pub fn add_job(&self, job: SchedulerJob) -> SchedulerResult<()> {
        self.add_job_at(job, self.now())
    }

    pub fn add_job_at(&self, job: SchedulerJob, now_ms: u64) -> SchedulerResult<()> {
        self.check_job(&job)
            .map_err(|reason| SchedulerError::InvalidJob { id: job.id, reason })?;

        let mut set = self.jobs.write()?;
        if set.jobs.contains_key(&job.id) {
            return Err(SchedulerError::DuplicateJob(job.id));
        }
        info!(job = job.id, filename = %job.filename, interval_ms = job.interval_ms, "job added");
        set.jobs.insert(job.id, ScheduledJob::new(job, now_ms));
        set.changed();
        drop(set);
        self.wake.notify_one();
        Ok(())
    }

    /// Enable or disable a job. Disabled jobs stay in the set.
    pub fn set_active(&self, id: u32, active: bool) -> SchedulerResult<()> {
        let mut set = self.jobs.write()?;
        let entry = set.jobs.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))?;
        if entry.job.active == active {
            return Ok(());
        }
        entry.job.active = active;
        set.changed();
        drop(set);
        info!(job = id, active, "job toggled");
        self.wake.notify_one();
        Ok(())
    }

    pub fn remove_job(&self, id: u32) -> SchedulerResult<SchedulerJob> {
        let mut set = self.jobs.write()?;
        let removed = set.jobs.remove(&id).ok_or(SchedulerError::JobNotFound(id))?;
        set.changed();
        drop(set);
        info!(job = id, "job removed");
        self.wake.notify_one();
        Ok(removed.job)
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn jobs(&self) -> SchedulerResult<Vec<ScheduledJob>> {
        Ok(self.jobs.read()?.jobs.values().cloned().collect())
    }

    pub fn active_count(&self) -> SchedulerResult<usize> {
        Ok(self.jobs.read()?.jobs.values().filter(|e| e.job.active).count())
    }

    /// Structural version of the job set.
    pub fn version(&self) -> SchedulerResult<u64> {
        Ok(self.jobs.read()?.version)
    }

    pub fn counters(&self) -> SchedulerCounters {
        SchedulerCounters {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            launches: self.stats.launches.load(Ordering::Relaxed),
            launch_failures: self.stats.launch_failures.load(Ordering::Relaxed),
            rejected_jobs: self.stats.rejected_jobs.load(Ordering::Relaxed),
            order_rebuilds: self.stats.order_rebuilds.load(Ordering::Relaxed),
        }
    }
}

fn idle_for(next: Option<u64>, now: u64, max_idle: Duration) -> Duration {
    next.map(|ts| Duration::from_millis(ts.saturating_sub(now)))
        .unwrap_or(max_idle)
        .min(max_idle)
}

/// The scheduler is the runtime set of the scheduler domain.
///
/// `admit` applies the configured argument mode, so the engine skips such
/// rows at load and rejects remote snapshots containing them before
/// anything is stored. `install` keeps the last row per id and still drops
/// rows the scheduler cannot run. Jobs that survive an install with the
/// same interval keep their timestamps; new or re-timed jobs are due
/// immediately.
impl RuntimeTarget<SchedulerJob> for JobScheduler {
    fn snapshot(&self) -> Result<Vec<SchedulerJob>, LockTimeout> {
        Ok(self.jobs.read()?.jobs.values().map(|e| e.job.clone()).collect())
    }

    fn install(&self, rows: Vec<SchedulerJob>) -> Result<(), LockTimeout> {
        let now = self.now();
        let mut accepted = BTreeMap::new();
        for job in rows {
            if let Err(reason) = self.check_job(&job) {
                self.stats.rejected_jobs.fetch_add(1, Ordering::Relaxed);
                warn!(job = job.id, %reason, "job rejected");
                continue;
            }
            accepted.insert(job.id, job);
        }

        let mut guard = self.jobs.write()?;
        let set = &mut *guard;
        let mut jobs = BTreeMap::new();
        for (id, job) in accepted {
            let entry = match set.jobs.remove(&id) {
                Some(prev) if prev.job.interval_ms == job.interval_ms => ScheduledJob { job, ..prev },
                _ => ScheduledJob::new(job, now),
            };
            jobs.insert(id, entry);
        }
        set.jobs = jobs;
        set.changed();
        let count = set.jobs.len();
        drop(guard);

        debug!(jobs = count, "scheduler job set installed");
        self.wake.notify_one();
        Ok(())
    }

    fn admit(&self, job: &SchedulerJob) -> Result<(), String> {
        let checked = self.check_job(job);
        if checked.is_err() {
            self.stats.rejected_jobs.fetch_add(1, Ordering::Relaxed);
        }
        checked
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("argument_mode", &self.argument_mode)
            .field("max_idle", &self.max_idle)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    use tidegate_core::{ConfigDomain, LoadSource};
    use tidegate_state::{
        EngineError, ReconciliationEngine, RowStore, SaveFlags, StoredRow, TableStore, TableWrite,
    };

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<(u32, Vec<String>)>>,
        fail: AtomicBool,
    }

    impl RecordingLauncher {
        fn ids(&self) -> Vec<u32> {
            self.launched.lock().iter().map(|(id, _)| *id).collect()
        }
    }

    impl JobLauncher for RecordingLauncher {
        fn launch(&self, job: &SchedulerJob) -> SchedulerResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SchedulerError::Launch {
                    id: job.id,
                    filename: job.filename.clone(),
                    reason: "permission denied".into(),
                });
            }
            self.launched.lock().push((job.id, job.arguments.clone()));
            Ok(())
        }
    }

    fn scheduler_with(mode: ArgumentMode) -> (JobScheduler, Arc<RecordingLauncher>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let config = SchedulerConfig {
            max_idle_ms: 50,
            argument_mode: mode,
        };
        let scheduler = JobScheduler::new(LockSettings::default(), &config, launcher.clone());
        (scheduler, launcher)
    }

    fn scheduler() -> (JobScheduler, Arc<RecordingLauncher>) {
        scheduler_with(ArgumentMode::Unbounded)
    }

    const T0: u64 = 1_700_000_000_000;

    #[test]
    fn job_runs_at_creation_then_every_interval() {
        let (scheduler, launcher) = scheduler();
        scheduler
            .add_job_at(SchedulerJob::new(1, 1000, "/usr/bin/report"), T0)
            .unwrap();
        assert_eq!(scheduler.jobs().unwrap()[0].next_run_ts, T0);

        assert_eq!(scheduler.run_once_at(T0).unwrap(), Some(T0 + 1000));
        let entry = &scheduler.jobs().unwrap()[0];
        assert_eq!(entry.last_run_ts, T0);
        assert_eq!(entry.next_run_ts, T0 + 1000);

        assert_eq!(scheduler.run_once_at(T0 + 500).unwrap(), Some(T0 + 1000));
        assert_eq!(launcher.ids(), vec![1]);

        scheduler.run_once_at(T0 + 1000).unwrap();
        assert_eq!(launcher.ids(), vec![1, 1]);
    }

    #[test]
    fn returns_earliest_next_run_across_jobs() {
        let (scheduler, _) = scheduler();
        scheduler.add_job_at(SchedulerJob::new(1, 5000, "/bin/a"), T0).unwrap();
        scheduler.add_job_at(SchedulerJob::new(2, 300, "/bin/b"), T0).unwrap();
        assert_eq!(scheduler.run_once_at(T0).unwrap(), Some(T0 + 300));
    }

    #[test]
    fn no_active_jobs_means_no_deadline() {
        let (scheduler, _) = scheduler();
        assert_eq!(scheduler.run_once_at(T0).unwrap(), None);
        scheduler.add_job_at(SchedulerJob::new(1, 100, "/bin/a"), T0).unwrap();
        scheduler.set_active(1, false).unwrap();
        assert_eq!(scheduler.run_once_at(T0).unwrap(), None);
    }

    #[test]
    fn disabled_job_is_kept_but_not_launched() {
        let (scheduler, launcher) = scheduler();
        scheduler.add_job_at(SchedulerJob::new(4, 100, "/bin/a"), T0).unwrap();
        scheduler.set_active(4, false).unwrap();
        scheduler.run_once_at(T0).unwrap();
        assert!(launcher.ids().is_empty());
        assert_eq!(scheduler.jobs().unwrap().len(), 1);
        assert_eq!(scheduler.active_count().unwrap(), 0);

        scheduler.set_active(4, true).unwrap();
        scheduler.run_once_at(T0 + 1).unwrap();
        assert_eq!(launcher.ids(), vec![4]);

        assert_eq!(scheduler.remove_job(4).unwrap().id, 4);
        assert!(matches!(scheduler.remove_job(4), Err(SchedulerError::JobNotFound(4))));
    }

    #[test]
    fn live_add_keeps_the_first_writer() {
        let (scheduler, _) = scheduler();
        scheduler.add_job_at(SchedulerJob::new(7, 100, "/bin/first"), T0).unwrap();
        let err = scheduler
            .add_job_at(SchedulerJob::new(7, 100, "/bin/second"), T0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(7)));
        assert_eq!(scheduler.jobs().unwrap()[0].job.filename, "/bin/first");
    }

    #[test]
    fn install_keeps_the_last_writer() {
        let (scheduler, _) = scheduler();
        scheduler
            .install(vec![
                SchedulerJob::new(7, 100, "/bin/first"),
                SchedulerJob::new(7, 100, "/bin/second"),
            ])
            .unwrap();
        let jobs = scheduler.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.filename, "/bin/second");
    }

    #[test]
    fn dispatch_order_is_rebuilt_only_after_changes() {
        let (scheduler, _) = scheduler();
        scheduler.add_job_at(SchedulerJob::new(1, 100, "/bin/a"), T0).unwrap();
        scheduler.run_once_at(T0).unwrap();
        scheduler.run_once_at(T0 + 10).unwrap();
        scheduler.run_once_at(T0 + 20).unwrap();
        assert_eq!(scheduler.counters().order_rebuilds, 1);

        let before = scheduler.version().unwrap();
        scheduler.set_active(1, false).unwrap();
        assert_eq!(scheduler.version().unwrap(), before + 1);
        scheduler.run_once_at(T0 + 30).unwrap();
        assert_eq!(scheduler.counters().order_rebuilds, 2);
        assert_eq!(scheduler.counters().ticks, 4);
    }

    #[test]
    fn failed_launch_still_reschedules() {
        let (scheduler, launcher) = scheduler();
        launcher.fail.store(true, Ordering::SeqCst);
        scheduler.add_job_at(SchedulerJob::new(1, 1000, "/bin/a"), T0).unwrap();
        assert_eq!(scheduler.run_once_at(T0).unwrap(), Some(T0 + 1000));
        assert_eq!(scheduler.counters().launch_failures, 1);
        assert_eq!(scheduler.jobs().unwrap()[0].last_run_ts, T0);
    }

    #[test]
    fn arguments_are_passed_in_order() {
        let (scheduler, launcher) = scheduler();
        let job = SchedulerJob::new(1, 1000, "/bin/a").with_arguments(["x", "y", "z"]);
        scheduler.add_job_at(job, T0).unwrap();
        scheduler.run_once_at(T0).unwrap();
        assert_eq!(launcher.launched.lock()[0].1, vec!["x", "y", "z"]);
    }

    #[test]
    fn legacy_mode_rejects_long_argument_lists() {
        let (scheduler, _) = scheduler_with(ArgumentMode::Legacy5);
        let long = SchedulerJob::new(1, 100, "/bin/a").with_arguments(["1", "2", "3", "4", "5", "6"]);
        assert!(matches!(
            scheduler.add_job_at(long.clone(), T0),
            Err(SchedulerError::InvalidJob { id: 1, .. })
        ));
        scheduler
            .install(vec![long, SchedulerJob::new(2, 100, "/bin/b")])
            .unwrap();
        let ids: Vec<u32> = scheduler.jobs().unwrap().iter().map(|e| e.job.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(scheduler.counters().rejected_jobs, 1);
    }

    #[test]
    fn install_preserves_timestamps_of_unchanged_jobs() {
        let now = Arc::new(AtomicU64::new(T0));
        let (scheduler, _) = scheduler();
        let scheduler = scheduler.with_clock({
            let now = now.clone();
            Arc::new(move || now.load(Ordering::SeqCst))
        });
        scheduler
            .install(vec![SchedulerJob::new(1, 1000, "/bin/a"), SchedulerJob::new(2, 1000, "/bin/b")])
            .unwrap();
        scheduler.run_once().unwrap();

        now.store(T0 + 200, Ordering::SeqCst);
        let mut retimed = SchedulerJob::new(2, 50, "/bin/b");
        retimed.comment = "faster".into();
        scheduler
            .install(vec![SchedulerJob::new(1, 1000, "/bin/a"), retimed])
            .unwrap();

        let jobs = scheduler.jobs().unwrap();
        assert_eq!(jobs[0].next_run_ts, T0 + 1000);
        assert_eq!(jobs[1].next_run_ts, T0 + 200);
        assert_eq!(jobs[1].last_run_ts, 0);
    }

    #[test]
    fn zero_interval_rows_are_dropped_at_load() {
        let disk = Arc::new(TableStore::open_in_memory().unwrap());
        let mirror = Arc::new(TableStore::open_in_memory().unwrap());
        let engine = ReconciliationEngine::new(disk.clone(), mirror);

        let good = StoredRow::new(
            "0000000001",
            serde_json::to_vec(&SchedulerJob::new(1, 1000, "/bin/a")).unwrap(),
        );
        let zero = StoredRow::new(
            "0000000002",
            br#"{"id":2,"active":true,"interval_ms":0,"filename":"/bin/b"}"#.to_vec(),
        );
        disk.replace_all(&[TableWrite {
            table: "scheduler",
            rows: &[good, zero],
        }])
        .unwrap();

        let (scheduler, _) = scheduler();
        let report = engine
            .load_domain_to_runtime::<SchedulerJob>(&scheduler, LoadSource::Disk)
            .unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped(), 1);
        let ids: Vec<u32> = scheduler.jobs().unwrap().iter().map(|e| e.job.id).collect();
        assert_eq!(ids, vec![1]);

        // The scheduler keeps working after a partial load.
        assert!(scheduler.run_once().unwrap().is_some());
    }

    #[test]
    fn scheduler_domain_round_trips_through_the_engine() {
        let disk = Arc::new(TableStore::open_in_memory().unwrap());
        let mirror = Arc::new(TableStore::open_in_memory().unwrap());
        let engine = ReconciliationEngine::new(disk, mirror);

        let (scheduler, _) = scheduler();
        scheduler
            .add_job(SchedulerJob::new(3, 250, "/bin/a").with_arguments(["--quiet"]))
            .unwrap();
        engine
            .save_domain_from_runtime::<SchedulerJob>(&scheduler, SaveFlags::PERSIST)
            .unwrap();

        let (restored, _) = scheduler_with(ArgumentMode::Unbounded);
        engine
            .load_domain_to_runtime::<SchedulerJob>(&restored, LoadSource::Disk)
            .unwrap();
        assert_eq!(restored.snapshot().unwrap(), scheduler.snapshot().unwrap());
    }

    #[test]
    fn legacy_mode_rejects_remote_snapshot_with_long_argument_lists() {
        let remote_engine = ReconciliationEngine::new(
            Arc::new(TableStore::open_in_memory().unwrap()),
            Arc::new(TableStore::open_in_memory().unwrap()),
        );
        let (remote, _) = scheduler();
        remote
            .add_job(SchedulerJob::new(1, 100, "/bin/a").with_arguments(["1", "2", "3", "4", "5", "6"]))
            .unwrap();
        remote.add_job(SchedulerJob::new(2, 100, "/bin/b")).unwrap();
        remote_engine
            .save_domain_from_runtime::<SchedulerJob>(&remote, SaveFlags::MIRROR)
            .unwrap();
        let snapshot = remote_engine.export_snapshot(ConfigDomain::Scheduler).unwrap();

        let engine = ReconciliationEngine::new(
            Arc::new(TableStore::open_in_memory().unwrap()),
            Arc::new(TableStore::open_in_memory().unwrap()),
        );
        let (local, _) = scheduler_with(ArgumentMode::Legacy5);
        local.add_job(SchedulerJob::new(9, 100, "/bin/local")).unwrap();
        let err = engine
            .apply_remote_snapshot::<SchedulerJob>(&local, &snapshot, false)
            .unwrap_err();

        assert!(matches!(err, EngineError::PayloadInvalid { .. }));
        let ids: Vec<u32> = local.jobs().unwrap().iter().map(|e| e.job.id).collect();
        assert_eq!(ids, vec![9]);
        assert_eq!(engine.get_checksum(ConfigDomain::Scheduler).version, 0);
        assert!(engine.mirror_rows::<SchedulerJob>().unwrap().is_empty());
    }

    #[test]
    fn legacy_mode_skips_long_argument_rows_at_load() {
        let disk = Arc::new(TableStore::open_in_memory().unwrap());
        let engine = ReconciliationEngine::new(disk, Arc::new(TableStore::open_in_memory().unwrap()));
        let (writer, _) = scheduler();
        writer
            .add_job(SchedulerJob::new(1, 100, "/bin/a").with_arguments(["1", "2", "3", "4", "5", "6"]))
            .unwrap();
        writer.add_job(SchedulerJob::new(2, 100, "/bin/b")).unwrap();
        engine
            .save_domain_from_runtime::<SchedulerJob>(&writer, SaveFlags::PERSIST)
            .unwrap();

        let (legacy, _) = scheduler_with(ArgumentMode::Legacy5);
        let report = engine
            .load_domain_to_runtime::<SchedulerJob>(&legacy, LoadSource::Disk)
            .unwrap();
        assert_eq!((report.loaded, report.skipped()), (1, 1));
        assert_eq!(legacy.counters().rejected_jobs, 1);
    }

    #[test]
    fn idle_is_capped_by_max_idle() {
        let max = Duration::from_millis(1000);
        assert_eq!(idle_for(None, T0, max), max);
        assert_eq!(idle_for(Some(T0 + 5000), T0, max), max);
        assert_eq!(idle_for(Some(T0 + 20), T0, max), Duration::from_millis(20));
        assert_eq!(idle_for(Some(T0 - 5), T0, max), Duration::ZERO);
    }

    #[tokio::test]
    async fn run_loop_ticks_until_shutdown() {
        let (scheduler, launcher) = scheduler();
        let scheduler = Arc::new(scheduler);
        scheduler.add_job(SchedulerJob::new(1, 20, "/bin/a")).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(launcher.ids().len() >= 2, "launched {:?}", launcher.ids());
    }
}
