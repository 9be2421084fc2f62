//! Per-peer sync state.

use std::collections::BTreeMap;

use serde::Serialize;

use tidegate_core::ConfigDomain;

/// What was last seen of one domain on one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainObservation {
    pub version: u64,
    pub hash: String,
    /// Consecutive polls in which the peer's hash differed from ours.
    pub diff_count: u32,
}

/// Everything the coordinator remembers about a peer.
#[derive(Debug, Clone, Default)]
pub struct PeerState {
    pub address: String,
    pub domains: BTreeMap<ConfigDomain, DomainObservation>,
    /// Epoch ms of the last successful pull from this peer.
    pub last_sync: Option<u64>,
    pub last_error: Option<String>,
}

impl PeerState {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Record a checksum seen on the peer and return the new diff count.
    ///
    /// Equal hashes reset the count. Otherwise it grows by one; with a
    /// non-zero `cap` it saturates there.
    pub fn observe(
        &mut self,
        domain: ConfigDomain,
        version: u64,
        hash: &str,
        local_hash: &str,
        cap: u32,
    ) -> u32 {
        let entry = self.domains.entry(domain).or_default();
        entry.version = version;
        entry.hash = hash.to_string();
        entry.diff_count = if hash == local_hash {
            0
        } else if cap > 0 {
            (entry.diff_count + 1).min(cap)
        } else {
            entry.diff_count.saturating_add(1)
        };
        entry.diff_count
    }

    pub fn reset(&mut self, domain: ConfigDomain) {
        if let Some(entry) = self.domains.get_mut(&domain) {
            entry.diff_count = 0;
        }
    }

    pub fn diff_count(&self, domain: ConfigDomain) -> u32 {
        self.domains.get(&domain).map_or(0, |o| o.diff_count)
    }

    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            address: self.address.clone(),
            domains: self
                .domains
                .iter()
                .map(|(domain, obs)| DomainStatus {
                    domain: *domain,
                    version: obs.version,
                    hash: obs.hash.clone(),
                    diff_count: obs.diff_count,
                })
                .collect(),
            last_sync: self.last_sync,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a peer for status queries and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub address: String,
    pub domains: Vec<DomainStatus>,
    pub last_sync: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainStatus {
    pub domain: ConfigDomain,
    pub version: u64,
    pub hash: String,
    pub diff_count: u32,
}
