//! Point-in-time metrics snapshot.

use serde::Serialize;

use tidegate_cluster::{ClusterCounters, PeerStatus};
use tidegate_core::ConfigDomain;
use tidegate_scheduler::{ScheduledJob, SchedulerCounters};
use tidegate_state::{ChecksumRecord, EngineCounters};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainVersion {
    pub domain: ConfigDomain,
    pub version: u64,
    pub computed_at: u64,
}

impl From<&ChecksumRecord> for DomainVersion {
    fn from(record: &ChecksumRecord) -> Self {
        Self {
            domain: record.domain,
            version: record.version,
            computed_at: record.computed_at,
        }
    }
}

/// Last launch of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub id: u32,
    pub active: bool,
    /// Epoch ms; 0 if the job has not run since it was loaded.
    pub last_run_ts: u64,
}

impl From<&ScheduledJob> for JobRun {
    fn from(entry: &ScheduledJob) -> Self {
        Self {
            id: entry.job.id,
            active: entry.job.active,
            last_run_ts: entry.last_run_ts,
        }
    }
}

/// Everything the exporter reads in one scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdminMetrics {
    pub domains: Vec<DomainVersion>,
    /// Per-peer divergence counts; empty when cluster sync is off.
    pub peers: Vec<PeerStatus>,
    pub active_jobs: usize,
    pub jobs: Vec<JobRun>,
    pub engine: EngineCounters,
    pub scheduler: SchedulerCounters,
    pub cluster: Option<ClusterCounters>,
}

impl AdminMetrics {
    pub fn with_cluster(mut self, peers: Vec<PeerStatus>, counters: ClusterCounters) -> Self {
        self.peers = peers;
        self.cluster = Some(counters);
        self
    }

    /// Largest divergence count across all peers for `domain`.
    pub fn max_divergence(&self, domain: ConfigDomain) -> u32 {
        self.peers
            .iter()
            .flat_map(|p| p.domains.iter())
            .filter(|d| d.domain == domain)
            .map(|d| d.diff_count)
            .max()
            .unwrap_or(0)
    }
}
