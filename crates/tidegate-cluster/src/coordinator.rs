//! ClusterSyncCoordinator: checksum polling and snapshot pulls.
//!
//! On every interval the coordinator asks each peer for its checksum
//! records and compares them with the local ledger:
//!
//! - equal hash: the peer/domain divergence counter resets to 0;
//! - different hash: the counter grows by one;
//! - unreachable or timed-out peer: nothing is recorded.
//!
//! When a counter reaches the domain's `diffs_before_sync` and the peer's
//! `{version, hash}` wins under [`remote_wins`], the coordinator pulls
//! that peer's snapshot and hands it to the local reconciler. A node whose
//! own copy wins just keeps its counter at the threshold and waits for
//! the peer to pull from it.
//!
//! Pulls for one domain are serialized by a per-domain async mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use tidegate_core::{AdminConfig, ConfigDomain, DomainSyncConfig, epoch_millis};
use tidegate_state::{ChecksumRecord, DomainReconciler, EngineError, remote_wins};

use crate::error::{SyncError, TransportError};
use crate::peer::{PeerState, PeerStatus};
use crate::transport::PeerTransport;

/// Coordinator settings, resolved from [`AdminConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// This node's own address in the peer list; never polled.
    pub advertise: Option<String>,
    pub check_interval: Duration,
    pub rpc_timeout: Duration,
    /// Log a status summary every N polls (0 disables).
    pub check_status_frequency: u32,
    /// Domains that take part in sync, with their thresholds.
    pub domains: BTreeMap<ConfigDomain, DomainSyncConfig>,
}

impl SyncSettings {
    pub fn from_config(config: &AdminConfig) -> Self {
        Self {
            advertise: config.cluster.advertise.clone(),
            check_interval: config.cluster.check_interval(),
            rpc_timeout: config.cluster.rpc_timeout(),
            check_status_frequency: config.cluster.check_status_frequency,
            domains: ConfigDomain::ALL
                .into_iter()
                .filter(|d| config.domain(*d).checksum)
                .map(|d| (d, config.sync_for(d)))
                .collect(),
        }
    }
}

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterCounters {
    pub polls: u64,
    pub peer_failures: u64,
    pub pulls: u64,
    pub pulls_applied: u64,
    pub pull_failures: u64,
    pub payload_rejections: u64,
}

#[derive(Debug, Default)]
struct ClusterStats {
    polls: AtomicU64,
    peer_failures: AtomicU64,
    pulls: AtomicU64,
    pulls_applied: AtomicU64,
    pull_failures: AtomicU64,
    payload_rejections: AtomicU64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// What one poll saw and did.
#[derive(Debug, Default)]
pub struct PollReport {
    pub reachable: usize,
    pub unreachable: usize,
    /// `(domain, peer, new local version)` for every applied pull.
    pub applied: Vec<(ConfigDomain, String, u64)>,
    /// `(domain, peer, error)` for every pull that changed nothing.
    pub failed: Vec<(ConfigDomain, String, String)>,
}

/// A peer whose copy of a domain should be pulled.
#[derive(Debug, Clone)]
struct Candidate {
    peer: String,
    version: u64,
    hash: String,
}

impl Candidate {
    /// Highest version, then greatest hash, then lowest address.
    fn beats(&self, other: &Candidate) -> bool {
        (self.version, &self.hash, std::cmp::Reverse(&self.peer))
            > (other.version, &other.hash, std::cmp::Reverse(&other.peer))
    }
}

pub struct ClusterSyncCoordinator {
    local: Arc<dyn DomainReconciler>,
    transport: Arc<dyn PeerTransport>,
    settings: SyncSettings,
    peers: Mutex<BTreeMap<String, PeerState>>,
    pull_locks: [tokio::sync::Mutex<()>; 7],
    stats: ClusterStats,
}

impl ClusterSyncCoordinator {
    pub fn new(
        local: Arc<dyn DomainReconciler>,
        transport: Arc<dyn PeerTransport>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            local,
            transport,
            settings,
            peers: Mutex::new(BTreeMap::new()),
            pull_locks: std::array::from_fn(|_| tokio::sync::Mutex::new(())),
            stats: ClusterStats::default(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Poll on the configured interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.settings.check_interval.as_millis() as u64,
            domains = self.settings.domains.len(),
            "cluster sync started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    info!("cluster sync shutting down");
                    break;
                }
            }
        }
    }

    /// One full poll: refresh peers, fetch checksums, pull where due.
    pub async fn poll_once(&self) -> PollReport {
        let poll = bump(&self.stats.polls);
        let addresses = self.refresh_peers();
        let mut report = PollReport::default();

        let mut fetches = JoinSet::new();
        for address in addresses {
            let transport = self.transport.clone();
            let timeout = self.settings.rpc_timeout;
            fetches.spawn(async move {
                let result = tokio::time::timeout(timeout, transport.fetch_checksums(&address))
                    .await
                    .unwrap_or_else(|_| {
                        Err(TransportError::Timeout {
                            peer: address.clone(),
                            after: timeout,
                        })
                    });
                (address, result)
            });
        }

        let mut candidates: BTreeMap<ConfigDomain, Candidate> = BTreeMap::new();
        while let Some(joined) = fetches.join_next().await {
            let (address, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "checksum fetch task failed");
                    continue;
                }
            };
            match result {
                Ok(records) => {
                    report.reachable += 1;
                    self.observe(&address, &records, &mut candidates);
                }
                Err(e) => {
                    report.unreachable += 1;
                    bump(&self.stats.peer_failures);
                    debug!(peer = %address, error = %e, "peer checksum poll failed");
                    if let Some(peer) = self.peers.lock().get_mut(&address) {
                        peer.last_error = Some(e.to_string());
                    }
                }
            }
        }

        for (domain, candidate) in candidates {
            match self.pull(domain, &candidate.peer).await {
                Ok(record) => report.applied.push((domain, candidate.peer, record.version)),
                Err(e) => report.failed.push((domain, candidate.peer, e.to_string())),
            }
        }

        let every = u64::from(self.settings.check_status_frequency);
        if every > 0 && poll % every == 0 {
            self.log_status();
        }
        report
    }

    /// Sync the peer map with the runtime peer list.
    fn refresh_peers(&self) -> Vec<String> {
        let mut peers = self.peers.lock();
        match self.local.cluster_peers() {
            Ok(rows) => {
                let own = self.settings.advertise.as_deref();
                let wanted: BTreeSet<String> = rows
                    .iter()
                    .map(|row| row.address())
                    .filter(|address| Some(address.as_str()) != own)
                    .collect();
                peers.retain(|address, _| {
                    let keep = wanted.contains(address);
                    if !keep {
                        info!(peer = %address, "peer removed");
                    }
                    keep
                });
                for address in wanted {
                    if !peers.contains_key(&address) {
                        info!(peer = %address, "peer added");
                        peers.insert(address.clone(), PeerState::new(address));
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to read cluster peers; keeping previous list"),
        }
        peers.keys().cloned().collect()
    }

    fn observe(
        &self,
        address: &str,
        records: &[ChecksumRecord],
        candidates: &mut BTreeMap<ConfigDomain, Candidate>,
    ) {
        let mut peers = self.peers.lock();
        let Some(peer) = peers.get_mut(address) else {
            return;
        };
        peer.last_error = None;

        for record in records {
            let Some(sync) = self.settings.domains.get(&record.domain) else {
                continue;
            };
            // Version 0: the peer has never saved this domain.
            if record.version == 0 {
                continue;
            }
            let local = self.local.checksum(record.domain);
            let threshold = sync.diffs_before_sync;
            let diffs = peer.observe(record.domain, record.version, &record.hash, &local.hash, threshold);
            if diffs == 0 {
                continue;
            }
            debug!(
                peer = %address,
                domain = %record.domain,
                remote_version = record.version,
                local_version = local.version,
                diffs,
                threshold,
                "checksum differs"
            );
            if threshold == 0 || diffs < threshold {
                continue;
            }
            if !remote_wins(record.version, &record.hash, &local) {
                debug!(peer = %address, domain = %record.domain, "local copy wins; waiting for peer to pull");
                continue;
            }

            let candidate = Candidate {
                peer: address.to_string(),
                version: record.version,
                hash: record.hash.clone(),
            };
            match candidates.get_mut(&record.domain) {
                Some(best) if !candidate.beats(best) => {}
                Some(best) => *best = candidate,
                None => {
                    candidates.insert(record.domain, candidate);
                }
            }
        }
    }

    /// Pull a peer's snapshot of `domain` and apply it locally.
    pub async fn pull(&self, domain: ConfigDomain, peer: &str) -> Result<ChecksumRecord, SyncError> {
        let _pulling = self.pull_locks[domain as usize].lock().await;
        bump(&self.stats.pulls);
        info!(%domain, %peer, "pulling snapshot");

        let result = self.fetch_and_apply(domain, peer).await;
        let mut peers = self.peers.lock();
        let state = peers.get_mut(peer);
        match &result {
            Ok(record) => {
                bump(&self.stats.pulls_applied);
                info!(%domain, %peer, version = record.version, "snapshot applied");
                if let Some(state) = state {
                    state.reset(domain);
                    state.last_sync = Some(epoch_millis());
                    state.last_error = None;
                }
            }
            Err(e) => {
                if e.is_payload_rejection() {
                    bump(&self.stats.payload_rejections);
                    warn!(%domain, %peer, error = %e, "rejected snapshot payload");
                } else if matches!(e, SyncError::Engine(EngineError::StaleSnapshot { .. })) {
                    debug!(%domain, %peer, "snapshot no longer newer than local copy");
                } else {
                    bump(&self.stats.pull_failures);
                    warn!(%domain, %peer, error = %e, "snapshot pull failed");
                }
                if let Some(state) = state {
                    state.last_error = Some(e.to_string());
                }
            }
        }
        result
    }

    async fn fetch_and_apply(
        &self,
        domain: ConfigDomain,
        peer: &str,
    ) -> Result<ChecksumRecord, SyncError> {
        let timeout = self.settings.rpc_timeout;
        let snapshot = tokio::time::timeout(timeout, self.transport.fetch_snapshot(peer, domain))
            .await
            .map_err(|_| TransportError::Timeout {
                peer: peer.to_string(),
                after: timeout,
            })??;

        if snapshot.domain != domain {
            return Err(TransportError::InvalidPayload {
                peer: peer.to_string(),
                reason: format!("asked for {domain}, got {}", snapshot.domain),
            }
            .into());
        }

        let persist = self
            .settings
            .domains
            .get(&domain)
            .is_some_and(|sync| sync.save_to_disk);
        let local = self.local.clone();
        let record = tokio::task::spawn_blocking(move || local.apply_remote_snapshot(&snapshot, persist))
            .await
            .map_err(|e| SyncError::Join(e.to_string()))??;
        Ok(record)
    }

    fn log_status(&self) {
        let peers = self.peers.lock();
        for peer in peers.values() {
            let diverged: Vec<String> = peer
                .domains
                .iter()
                .filter(|(_, obs)| obs.diff_count > 0)
                .map(|(domain, obs)| format!("{domain}={}", obs.diff_count))
                .collect();
            info!(
                peer = %peer.address,
                diverged = %diverged.join(","),
                last_sync = ?peer.last_sync,
                last_error = ?peer.last_error,
                "cluster peer status"
            );
        }
    }

    /// Current view of every peer.
    pub fn peer_statuses(&self) -> Vec<PeerStatus> {
        self.peers.lock().values().map(PeerState::status).collect()
    }

    pub fn counters(&self) -> ClusterCounters {
        ClusterCounters {
            polls: self.stats.polls.load(Ordering::Relaxed),
            peer_failures: self.stats.peer_failures.load(Ordering::Relaxed),
            pulls: self.stats.pulls.load(Ordering::Relaxed),
            pulls_applied: self.stats.pulls_applied.load(Ordering::Relaxed),
            pull_failures: self.stats.pull_failures.load(Ordering::Relaxed),
            payload_rejections: self.stats.payload_rejections.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ClusterSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSyncCoordinator")
            .field("settings", &self.settings)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}
