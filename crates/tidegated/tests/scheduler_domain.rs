//! Scheduler domain round trips through the admin service: runtime edits,
//! disk persistence, reload and dispatch.

use std::sync::Arc;

use parking_lot::Mutex;

use tidegate_admin::AdminService;
use tidegate_core::{AdminConfig, ArgumentMode, ConfigDomain};
use tidegate_scheduler::{JobLauncher, SchedulerJob, SchedulerResult};
use tidegate_state::SaveFlags;

#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<(u32, String, Vec<String>)>>,
}

impl JobLauncher for RecordingLauncher {
    fn launch(&self, job: &SchedulerJob) -> SchedulerResult<()> {
        self.launched
            .lock()
            .push((job.id, job.filename.clone(), job.arguments.clone()));
        Ok(())
    }
}

fn open(dir: &tempfile::TempDir, mode: ArgumentMode) -> (AdminService, Arc<RecordingLauncher>) {
    let mut config = AdminConfig::default();
    config.admin.data_dir = dir.path().to_path_buf();
    config.scheduler.argument_mode = mode;
    let launcher = Arc::new(RecordingLauncher::default());
    let service = AdminService::open(config, launcher.clone()).unwrap();
    service.bootstrap().unwrap();
    (service, launcher)
}

fn job(id: u32, args: &[&str]) -> SchedulerJob {
    SchedulerJob::new(id, 30_000, "/usr/local/bin/check")
        .with_arguments(args.iter().copied())
}

#[test]
fn jobs_survive_restart_and_launch_with_verbatim_arguments() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (service, _) = open(&dir, ArgumentMode::Unbounded);
        let scheduler = service.scheduler();
        scheduler.add_job(job(1, &["--host", "db 1"])).unwrap();
        scheduler.add_job(job(2, &[])).unwrap();
        scheduler.set_active(2, false).unwrap();
        let outcome = service
            .save_domain_from_runtime(ConfigDomain::Scheduler, SaveFlags::PERSIST)
            .unwrap();
        assert_eq!(outcome.record().map(|r| r.version), Some(2));
    }

    let (service, launcher) = open(&dir, ArgumentMode::Unbounded);
    let scheduler = service.scheduler();
    assert_eq!(scheduler.jobs().unwrap().len(), 2);
    assert_eq!(scheduler.active_count().unwrap(), 1);

    let now = scheduler.now();
    let next = scheduler.run_once_at(now).unwrap();
    assert_eq!(next, Some(now + 30_000));

    let launched = launcher.launched.lock().clone();
    assert_eq!(
        launched,
        vec![(
            1,
            "/usr/local/bin/check".to_string(),
            vec!["--host".to_string(), "db 1".to_string()]
        )]
    );

    let metrics = service.metrics().unwrap();
    assert_eq!(metrics.active_jobs, 1);
    let run = metrics.jobs.iter().find(|j| j.id == 1).unwrap();
    assert_eq!(run.last_run_ts, now);
}

#[test]
fn legacy_mode_drops_jobs_with_too_many_arguments() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (service, _) = open(&dir, ArgumentMode::Unbounded);
        let scheduler = service.scheduler();
        scheduler.add_job(job(1, &["a", "b", "c", "d", "e", "f"])).unwrap();
        scheduler.add_job(job(2, &["a", "b"])).unwrap();
        service
            .save_domain_from_runtime(ConfigDomain::Scheduler, SaveFlags::PERSIST)
            .unwrap();
    }

    let (service, _) = open(&dir, ArgumentMode::Legacy5);
    let ids: Vec<u32> = service
        .scheduler()
        .jobs()
        .unwrap()
        .iter()
        .map(|entry| entry.job.id)
        .collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(service.scheduler().counters().rejected_jobs, 1);
}

#[test]
fn timestamps_do_not_move_the_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = open(&dir, ArgumentMode::Unbounded);
    service.scheduler().add_job(job(5, &[])).unwrap();
    let first = service
        .save_domain_from_runtime(ConfigDomain::Scheduler, SaveFlags::MIRROR)
        .unwrap();

    let now = service.scheduler().now();
    service.scheduler().run_once_at(now).unwrap();
    let second = service
        .save_domain_from_runtime(ConfigDomain::Scheduler, SaveFlags::MIRROR)
        .unwrap();

    assert_eq!(first.record().unwrap().hash, second.record().unwrap().hash);
    assert_eq!(second.record().unwrap().version, first.record().unwrap().version + 1);
}
