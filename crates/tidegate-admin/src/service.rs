//! AdminService: the single owner of every domain's runtime set, the
//! reconciliation engine and the job scheduler.
//!
//! Nothing here is global: the daemon builds one service from its config
//! and hands an `Arc` of it to the background timers and the peer router.

use std::sync::Arc;

use tracing::{error, info, warn};

use tidegate_core::{AdminConfig, ConfigDomain, LoadSource};
use tidegate_metrics::{AdminMetrics, DomainVersion, JobRun};
use tidegate_scheduler::{JobLauncher, JobScheduler, SchedulerJob};
use tidegate_state::{
    BackendServer, ChecksumRecord, DomainPolicy, DomainReconciler, DomainSnapshot,
    EngineError, FirewallUser, LoadReport, PeerRow, QueryRule, ReconciliationEngine, RowStore,
    RuntimeSet, RuntimeTarget, SaveFlags, SaveOutcome, TableStore, UserAccount, Variable,
};

use crate::error::{AdminError, AdminResult};
use crate::runtime::GeneralRuntime;

/// Binds `$target` to the runtime set of `$domain` as a typed
/// `&dyn RuntimeTarget<Row>` and evaluates `$body` with it.
macro_rules! with_runtime {
    ($svc:expr, $domain:expr, |$target:ident| $body:expr) => {
        match $domain {
            ConfigDomain::ServerPool => {
                let $target: &dyn RuntimeTarget<BackendServer> = &$svc.servers;
                $body
            }
            ConfigDomain::Users => {
                let $target: &dyn RuntimeTarget<UserAccount> = &$svc.general;
                $body
            }
            ConfigDomain::QueryRules => {
                let $target: &dyn RuntimeTarget<QueryRule> = &$svc.general;
                $body
            }
            ConfigDomain::Firewall => {
                let $target: &dyn RuntimeTarget<FirewallUser> = &$svc.general;
                $body
            }
            ConfigDomain::Scheduler => {
                let $target: &dyn RuntimeTarget<SchedulerJob> = &*$svc.scheduler;
                $body
            }
            ConfigDomain::ClusterPeers => {
                let $target: &dyn RuntimeTarget<PeerRow> = &$svc.general;
                $body
            }
            ConfigDomain::Variables => {
                let $target: &dyn RuntimeTarget<Variable> = &$svc.general;
                $body
            }
        }
    };
}

/// Binds the type alias `$row` to the row type of `$domain` and evaluates
/// `$body`, for engine calls that need no runtime set.
macro_rules! with_row_type {
    ($domain:expr, |$row:ident| $body:expr) => {
        match $domain {
            ConfigDomain::ServerPool => {
                type $row = BackendServer;
                $body
            }
            ConfigDomain::Users => {
                type $row = UserAccount;
                $body
            }
            ConfigDomain::QueryRules => {
                type $row = QueryRule;
                $body
            }
            ConfigDomain::Firewall => {
                type $row = FirewallUser;
                $body
            }
            ConfigDomain::Scheduler => {
                type $row = SchedulerJob;
                $body
            }
            ConfigDomain::ClusterPeers => {
                type $row = PeerRow;
                $body
            }
            ConfigDomain::Variables => {
                type $row = Variable;
                $body
            }
        }
    };
}

pub struct AdminService {
    config: AdminConfig,
    engine: ReconciliationEngine,
    servers: RuntimeSet<BackendServer>,
    general: GeneralRuntime,
    scheduler: Arc<JobScheduler>,
}

impl AdminService {
    pub fn new(
        config: AdminConfig,
        disk: Arc<dyn RowStore>,
        mirror: Arc<dyn RowStore>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        let locks = config.lock_settings();
        let engine = ConfigDomain::ALL.into_iter().fold(
            ReconciliationEngine::new(disk, mirror),
            |engine, domain| {
                engine.with_policy(domain, DomainPolicy {
                    require_rows: config.domain(domain).require_rows,
                })
            },
        );
        Self {
            engine,
            servers: RuntimeSet::new("server_pool", locks),
            general: GeneralRuntime::new(locks),
            scheduler: Arc::new(JobScheduler::new(locks, &config.scheduler, launcher)),
            config,
        }
    }

    /// Open the disk database under `data_dir` and an in-memory mirror.
    pub fn open(config: AdminConfig, launcher: Arc<dyn JobLauncher>) -> AdminResult<Self> {
        let path = config.admin.data_dir.join("tidegate.redb");
        let disk = TableStore::open(&path)?;
        let mirror = TableStore::open_in_memory()?;
        info!(path = ?path, "table store opened");
        Ok(Self::new(config, Arc::new(disk), Arc::new(mirror), launcher))
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn servers(&self) -> &RuntimeSet<BackendServer> {
        &self.servers
    }

    pub fn general(&self) -> &GeneralRuntime {
        &self.general
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Load every domain from disk, then publish it to the mirror and
    /// ledger. Every domain is attempted even when one fails.
    pub fn bootstrap(&self) -> AdminResult<Vec<LoadReport>> {
        let mut reports = Vec::with_capacity(ConfigDomain::ALL.len());
        let mut failed = 0;
        for domain in ConfigDomain::ALL {
            match self.load_from(domain, LoadSource::Disk) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(%domain, error = %e, "bootstrap load failed");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(AdminError::Bootstrap { failed });
        }
        info!(domains = reports.len(), "bootstrap complete");
        Ok(reports)
    }

    /// LOAD <domain> TO RUNTIME from the configured source.
    pub fn load_domain_to_runtime(&self, domain: ConfigDomain) -> AdminResult<LoadReport> {
        self.load_from(domain, self.config.admin.load_source)
    }

    fn load_from(&self, domain: ConfigDomain, source: LoadSource) -> AdminResult<LoadReport> {
        let report = with_runtime!(self, domain, |target| {
            let report = self.engine.load_domain_to_runtime(target, source)?;
            // Refresh mirror and ledger so peers see what was loaded.
            self.engine.save_domain_from_runtime(target, SaveFlags::MIRROR)?;
            report
        });
        if report.skipped() > 0 {
            warn!(%domain, skipped = report.skipped(), "rows rejected during load");
        }
        Ok(report)
    }

    /// SAVE <domain> FROM RUNTIME.
    pub fn save_domain_from_runtime(
        &self,
        domain: ConfigDomain,
        flags: SaveFlags,
    ) -> AdminResult<SaveOutcome> {
        let outcome = with_runtime!(self, domain, |target| {
            self.engine.save_domain_from_runtime(target, flags)?
        });
        Ok(outcome)
    }

    pub fn get_checksum(&self, domain: ConfigDomain) -> ChecksumRecord {
        self.engine.get_checksum(domain)
    }

    /// SAVE <domain> TO DISK: copy the mirror as-is.
    pub fn flush_mirror_to_disk(&self, domain: ConfigDomain) -> AdminResult<usize> {
        let rows = with_row_type!(domain, |Row| self.engine.flush_mirror_to_disk::<Row>()?);
        Ok(rows)
    }

    pub fn dump_checksums(&self) -> AdminResult<Vec<ChecksumRecord>> {
        Ok(self.engine.dump_checksums()?)
    }

    /// Read-only metrics snapshot, without cluster state.
    pub fn metrics(&self) -> AdminResult<AdminMetrics> {
        let jobs = self.scheduler.jobs()?;
        Ok(AdminMetrics {
            domains: self.engine.ledger().all().iter().map(DomainVersion::from).collect(),
            active_jobs: jobs.iter().filter(|entry| entry.job.active).count(),
            jobs: jobs.iter().map(JobRun::from).collect(),
            engine: self.engine.counters(),
            scheduler: self.scheduler.counters(),
            ..AdminMetrics::default()
        })
    }
}

impl DomainReconciler for AdminService {
    fn checksum(&self, domain: ConfigDomain) -> ChecksumRecord {
        self.engine.get_checksum(domain)
    }

    fn checksums(&self) -> Vec<ChecksumRecord> {
        ConfigDomain::ALL
            .into_iter()
            .filter(|d| self.config.domain(*d).checksum)
            .map(|d| self.engine.get_checksum(d))
            .collect()
    }

    fn snapshot(&self, domain: ConfigDomain) -> Result<DomainSnapshot, EngineError> {
        self.engine.export_snapshot(domain)
    }

    fn apply_remote_snapshot(
        &self,
        snapshot: &DomainSnapshot,
        persist: bool,
    ) -> Result<ChecksumRecord, EngineError> {
        with_runtime!(self, snapshot.domain, |target| {
            self.engine.apply_remote_snapshot(target, snapshot, persist)
        })
    }

    fn cluster_peers(&self) -> Result<Vec<PeerRow>, EngineError> {
        Ok(self.general.read()?.cluster_peers.clone())
    }
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService")
            .field("data_dir", &self.config.admin.data_dir)
            .field("engine", &self.engine.counters())
            .finish_non_exhaustive()
    }
}
