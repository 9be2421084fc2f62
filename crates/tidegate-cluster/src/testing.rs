//! Minimal node used by the cluster tests: variables and a peer list,
//! backed by in-memory stores.

use std::sync::Arc;

use tidegate_core::{ConfigDomain, LockSettings};
use tidegate_state::{
    ChecksumRecord, DomainReconciler, DomainSnapshot, EngineError, PeerRow, ReconciliationEngine,
    RuntimeSet, RuntimeTarget, SaveFlags, TableStore, Variable,
};

pub(crate) struct TestNode {
    pub engine: ReconciliationEngine,
    pub vars: RuntimeSet<Variable>,
    pub peers: RuntimeSet<PeerRow>,
}

impl TestNode {
    pub fn new() -> Arc<Self> {
        let disk = Arc::new(TableStore::open_in_memory().unwrap());
        let mirror = Arc::new(TableStore::open_in_memory().unwrap());
        Arc::new(Self {
            engine: ReconciliationEngine::new(disk, mirror),
            vars: RuntimeSet::new("variables", LockSettings::default()),
            peers: RuntimeSet::new("cluster_peers", LockSettings::default()),
        })
    }

    /// Replace the variables and save them once.
    pub fn set_vars(&self, pairs: &[(&str, &str)]) -> ChecksumRecord {
        let rows = pairs.iter().map(|(n, v)| Variable::new(*n, *v)).collect();
        self.vars.install(rows).unwrap();
        self.save_vars()
    }

    pub fn save_vars(&self) -> ChecksumRecord {
        self.engine
            .save_domain_from_runtime(&self.vars, SaveFlags::MIRROR)
            .unwrap()
            .record()
            .cloned()
            .unwrap()
    }

    pub fn set_peers(&self, addresses: &[&str]) {
        let rows = addresses
            .iter()
            .map(|a| {
                let (host, port) = a.rsplit_once(':').unwrap();
                PeerRow {
                    hostname: host.to_string(),
                    port: port.parse().unwrap(),
                    weight: 0,
                    comment: String::new(),
                }
            })
            .collect();
        self.peers.install(rows).unwrap();
    }

    pub fn vars_checksum(&self) -> ChecksumRecord {
        self.engine.get_checksum(ConfigDomain::Variables)
    }
}

impl DomainReconciler for TestNode {
    fn checksum(&self, domain: ConfigDomain) -> ChecksumRecord {
        self.engine.get_checksum(domain)
    }

    fn checksums(&self) -> Vec<ChecksumRecord> {
        vec![self.engine.get_checksum(ConfigDomain::Variables)]
    }

    fn snapshot(&self, domain: ConfigDomain) -> Result<DomainSnapshot, EngineError> {
        self.engine.export_snapshot(domain)
    }

    fn apply_remote_snapshot(
        &self,
        snapshot: &DomainSnapshot,
        persist: bool,
    ) -> Result<ChecksumRecord, EngineError> {
        match snapshot.domain {
            ConfigDomain::Variables => self.engine.apply_remote_snapshot(&self.vars, snapshot, persist),
            other => Err(EngineError::PayloadInvalid {
                domain: other,
                reason: "not served by test node".into(),
            }),
        }
    }

    fn cluster_peers(&self) -> Result<Vec<PeerRow>, EngineError> {
        Ok(self.peers.snapshot()?)
    }
}
