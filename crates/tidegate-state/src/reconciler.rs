//! The seam between cluster sync and whoever owns the domain stores.

use serde::{Deserialize, Serialize};

use tidegate_core::ConfigDomain;

use crate::checksum::ChecksumRecord;
use crate::error::EngineError;
use crate::types::PeerRow;

/// A domain's full row set as served to peers.
///
/// Rows are carried as JSON values so the wire format does not depend on
/// the receiving node's types; the receiver decodes and re-hashes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub domain: ConfigDomain,
    pub version: u64,
    pub hash: String,
    pub rows: Vec<serde_json::Value>,
}

/// Local operations the cluster coordinator and peer endpoints need.
pub trait DomainReconciler: Send + Sync {
    /// Current record of one domain.
    fn checksum(&self, domain: ConfigDomain) -> ChecksumRecord;

    /// Records of every domain that participates in cluster sync.
    fn checksums(&self) -> Vec<ChecksumRecord>;

    /// Mirror rows plus a consistent ledger record.
    fn snapshot(&self, domain: ConfigDomain) -> Result<DomainSnapshot, EngineError>;

    /// Validate and apply a pulled snapshot if it wins against local state.
    fn apply_remote_snapshot(
        &self,
        snapshot: &DomainSnapshot,
        persist: bool,
    ) -> Result<ChecksumRecord, EngineError>;

    /// The runtime cluster peer list.
    fn cluster_peers(&self) -> Result<Vec<PeerRow>, EngineError>;
}

/// Whether a remote `{version, hash}` wins against the local one.
///
/// Higher version wins. On equal versions the lexicographically greater
/// hash wins, so two nodes holding conflicting edits at the same version
/// settle on the same side.
pub fn remote_wins(remote_version: u64, remote_hash: &str, local: &ChecksumRecord) -> bool {
    remote_version > local.version
        || (remote_version == local.version && remote_hash > local.hash.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(version: u64, hash: &str) -> ChecksumRecord {
        ChecksumRecord {
            domain: ConfigDomain::Users,
            version,
            hash: hash.to_string(),
            computed_at: 0,
        }
    }

    #[test]
    fn higher_version_wins_regardless_of_hash() {
        assert!(remote_wins(5, "000", &local(4, "fff")));
        assert!(!remote_wins(3, "fff", &local(4, "000")));
    }

    #[test]
    fn tie_break_is_symmetric() {
        let a = "aaaa";
        let b = "bbbb";
        assert!(remote_wins(7, b, &local(7, a)));
        assert!(!remote_wins(7, a, &local(7, b)));
        assert!(!remote_wins(7, a, &local(7, a)));
    }

    #[test]
    fn snapshot_serializes_domain_as_name() {
        let snapshot = DomainSnapshot {
            domain: ConfigDomain::ServerPool,
            version: 2,
            hash: "ab".into(),
            rows: vec![serde_json::json!({"x": 1})],
        };
        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.contains("\"server_pool\""));
        let back: DomainSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
    }
}
