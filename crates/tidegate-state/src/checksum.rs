//! ChecksumLedger: per-domain `{version, hash}` tracking.
//!
//! The hash is a SHA-256 digest over the domain's rows after sorting them
//! by primary key, so two nodes holding the same logical set agree on it
//! no matter the order rows were inserted in. Each row is framed as
//! `len(key) | key | len(value) | value` with little-endian `u64` lengths.
//!
//! Versions only move forward. `update` is the single writer and is only
//! called by the engine after a save has committed.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use tidegate_core::{ConfigDomain, epoch_millis};

use crate::error::StateResult;
use crate::row::{DomainRow, encode_row};
use crate::store::StoredRow;

/// Current checksum state of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub domain: ConfigDomain,
    pub version: u64,
    pub hash: String,
    /// Unix epoch milliseconds of the last update (0 before the first save).
    pub computed_at: u64,
}

/// Digest stored rows in canonical (key-sorted) order.
pub fn digest_rows(rows: &[StoredRow]) -> String {
    let mut sorted: Vec<&StoredRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.value.cmp(&b.value)));

    let mut hasher = Sha256::new();
    for row in sorted {
        hasher.update((row.key.len() as u64).to_le_bytes());
        hasher.update(row.key.as_bytes());
        hasher.update((row.value.len() as u64).to_le_bytes());
        hasher.update(&row.value);
    }
    hex::encode(hasher.finalize())
}

/// Hash of a domain with no rows.
pub fn empty_hash() -> String {
    digest_rows(&[])
}

/// Tracks the current checksum of every domain.
#[derive(Debug)]
pub struct ChecksumLedger {
    records: RwLock<HashMap<ConfigDomain, ChecksumRecord>>,
}

impl Default for ChecksumLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumLedger {
    /// Every domain starts at version 0 with the empty-set hash.
    pub fn new() -> Self {
        let empty = empty_hash();
        let records = ConfigDomain::ALL
            .into_iter()
            .map(|domain| {
                (
                    domain,
                    ChecksumRecord {
                        domain,
                        version: 0,
                        hash: empty.clone(),
                        computed_at: 0,
                    },
                )
            })
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Canonical hash of a typed row set.
    pub fn compute<R: DomainRow>(rows: &[R]) -> StateResult<String> {
        let encoded = rows.iter().map(encode_row).collect::<StateResult<Vec<_>>>()?;
        Ok(digest_rows(&encoded))
    }

    pub fn get(&self, domain: ConfigDomain) -> ChecksumRecord {
        self.records
            .read()
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| ChecksumRecord {
                domain,
                version: 0,
                hash: empty_hash(),
                computed_at: 0,
            })
    }

    /// All records, in domain order.
    pub fn all(&self) -> Vec<ChecksumRecord> {
        let records = self.records.read();
        let mut all: Vec<ChecksumRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.domain);
        all
    }

    /// Record a new hash and advance the version.
    ///
    /// A local save bumps the version by one. An accepted remote apply
    /// passes the peer's version, which is adopted as is, so both nodes
    /// report the same `{version, hash}`. The version never decreases.
    pub fn update(&self, domain: ConfigDomain, hash: String, remote: Option<u64>) -> ChecksumRecord {
        let mut records = self.records.write();
        let entry = records.entry(domain).or_insert_with(|| ChecksumRecord {
            domain,
            version: 0,
            hash: String::new(),
            computed_at: 0,
        });
        entry.version = match remote {
            Some(version) => version.max(entry.version),
            None => entry.version + 1,
        };
        entry.hash = hash;
        entry.computed_at = epoch_millis();
        debug!(%domain, version = entry.version, hash = %entry.hash, "checksum updated");
        entry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variable;
    use proptest::prelude::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<Variable> {
        pairs.iter().map(|(n, v)| Variable::new(*n, *v)).collect()
    }

    #[test]
    fn ledger_starts_at_version_zero_with_empty_hash() {
        let ledger = ChecksumLedger::new();
        for domain in ConfigDomain::ALL {
            let record = ledger.get(domain);
            assert_eq!(record.version, 0);
            assert_eq!(record.hash, empty_hash());
        }
        assert_eq!(ledger.all().len(), ConfigDomain::ALL.len());
    }

    #[test]
    fn update_bumps_version_monotonically() {
        let ledger = ChecksumLedger::new();
        let first = ledger.update(ConfigDomain::Users, "a".into(), None);
        let second = ledger.update(ConfigDomain::Users, "b".into(), None);
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(ledger.get(ConfigDomain::Users).hash, "b");
        // Other domains are untouched.
        assert_eq!(ledger.get(ConfigDomain::ServerPool).version, 0);
    }

    #[test]
    fn remote_version_is_adopted_but_never_lowers_it() {
        let ledger = ChecksumLedger::new();
        let raised = ledger.update(ConfigDomain::Variables, "x".into(), Some(10));
        assert_eq!(raised.version, 10);

        // An equal-version apply keeps the version and takes the new hash.
        let tied = ledger.update(ConfigDomain::Variables, "y".into(), Some(10));
        assert_eq!((tied.version, tied.hash.as_str()), (10, "y"));

        let not_lowered = ledger.update(ConfigDomain::Variables, "z".into(), Some(3));
        assert_eq!(not_lowered.version, 10);
    }

    #[test]
    fn different_content_yields_different_hash() {
        let a = ChecksumLedger::compute(&vars(&[("x", "1")])).unwrap();
        let b = ChecksumLedger::compute(&vars(&[("x", "2")])).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn framing_separates_key_and_value_boundaries() {
        let a = digest_rows(&[StoredRow::new("ab", b"c".to_vec())]);
        let b = digest_rows(&[StoredRow::new("a", b"bc".to_vec())]);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn hash_ignores_insertion_order(
            (original, shuffled) in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..24)
                .prop_flat_map(|m| {
                    let rows: Vec<(String, String)> = m.into_iter().collect();
                    (Just(rows.clone()), Just(rows).prop_shuffle())
                })
        ) {
            let a: Vec<Variable> = original.iter().map(|(n, v)| Variable::new(n.as_str(), v.as_str())).collect();
            let b: Vec<Variable> = shuffled.iter().map(|(n, v)| Variable::new(n.as_str(), v.as_str())).collect();
            prop_assert_eq!(
                ChecksumLedger::compute(&a).unwrap(),
                ChecksumLedger::compute(&b).unwrap()
            );
        }
    }
}
