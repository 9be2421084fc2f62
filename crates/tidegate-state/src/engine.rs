//! ReconciliationEngine: moves a domain's rows between its runtime set,
//! the mirror, and disk, and is the only writer of the checksum ledger.
//!
//! One generic engine serves every domain; the per-domain behaviour comes
//! from the row type's [`DomainRow`] descriptor and the domain's
//! [`DomainPolicy`].
//!
//! # Save ordering
//!
//! 1. Take the domain's commit mutex.
//! 2. Copy the runtime rows under the runtime read lock, then release it.
//! 3. Canonicalize and encode; no runtime lock is held from here on.
//! 4. Disk transaction (when persisting), then mirror transaction.
//! 5. Ledger update.
//!
//! A failure in step 4 returns before the ledger moves, so the checksum
//! never advances past content that is not on disk.
//!
//! A remote apply writes disk and mirror before installing the rows into
//! the runtime set. If either the mirror write or the install fails, the
//! stores are put back to what they held before.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use tidegate_core::{ConfigDomain, LoadSource};

use crate::checksum::{ChecksumLedger, ChecksumRecord, digest_rows};
use crate::error::{EngineError, StateError};
use crate::reconciler::{DomainSnapshot, remote_wins};
use crate::row::{DomainRow, canonicalize, decode_row, encode_row};
use crate::runtime::RuntimeTarget;
use crate::store::{RowStore, StoredRow, TableWrite};
use crate::tables::CHECKSUMS;

/// Per-domain load behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainPolicy {
    /// Fail the load instead of installing an empty set.
    pub require_rows: bool,
}

/// Flags for [`ReconciliationEngine::save_domain_from_runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveFlags {
    /// Mirror becomes exactly the runtime set. When false, rows already in
    /// the mirror win and runtime rows are only added where absent.
    pub replace: bool,
    /// Also write the resulting set to disk.
    pub persist: bool,
    /// Refuse to write an empty set over a non-empty disk table.
    pub only_if_empty: bool,
}

impl SaveFlags {
    /// Refresh the mirror and ledger only.
    pub const MIRROR: SaveFlags = SaveFlags {
        replace: true,
        persist: false,
        only_if_empty: false,
    };

    /// Mirror and disk.
    pub const PERSIST: SaveFlags = SaveFlags {
        replace: true,
        persist: true,
        only_if_empty: false,
    };

    /// Startup flush that never wipes existing disk rows.
    pub const BOOTSTRAP: SaveFlags = SaveFlags {
        replace: true,
        persist: true,
        only_if_empty: true,
    };
}

impl Default for SaveFlags {
    fn default() -> Self {
        SaveFlags::PERSIST
    }
}

/// Result of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(ChecksumRecord),
    /// `only_if_empty` blocked the write; nothing changed.
    Skipped { disk_rows: u64 },
}

impl SaveOutcome {
    pub fn record(&self) -> Option<&ChecksumRecord> {
        match self {
            SaveOutcome::Saved(record) => Some(record),
            SaveOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SaveOutcome::Skipped { .. })
    }
}

/// What a load installed and what it left out.
#[derive(Debug)]
pub struct LoadReport {
    pub domain: ConfigDomain,
    pub source: LoadSource,
    pub loaded: usize,
    /// Rows that failed to decode or validate, one error each.
    pub rejected: Vec<EngineError>,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.rejected.len()
    }
}

#[derive(Debug, Default)]
struct EngineStats {
    loads: AtomicU64,
    saves: AtomicU64,
    saves_skipped: AtomicU64,
    save_failures: AtomicU64,
    rows_skipped: AtomicU64,
    remote_applies: AtomicU64,
    remote_rejections: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub loads: u64,
    pub saves: u64,
    pub saves_skipped: u64,
    pub save_failures: u64,
    pub rows_skipped: u64,
    pub remote_applies: u64,
    pub remote_rejections: u64,
}

impl EngineStats {
    fn counters(&self) -> EngineCounters {
        EngineCounters {
            loads: self.loads.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            saves_skipped: self.saves_skipped.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            remote_applies: self.remote_applies.load(Ordering::Relaxed),
            remote_rejections: self.remote_rejections.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Encoded canonical rows plus the derived subset, ready to write.
struct PreparedRows {
    canonical: Vec<StoredRow>,
    derived: Option<(&'static str, Vec<StoredRow>)>,
}

impl PreparedRows {
    fn writes(&self, table: &'static str) -> Vec<TableWrite<'_>> {
        let mut writes = vec![TableWrite {
            table,
            rows: &self.canonical,
        }];
        if let Some((name, rows)) = &self.derived {
            writes.push(TableWrite { table: *name, rows });
        }
        writes
    }
}

pub struct ReconciliationEngine {
    disk: Arc<dyn RowStore>,
    mirror: Arc<dyn RowStore>,
    ledger: ChecksumLedger,
    policies: HashMap<ConfigDomain, DomainPolicy>,
    commit_locks: [Mutex<()>; 7],
    stats: EngineStats,
}

impl ReconciliationEngine {
    pub fn new(disk: Arc<dyn RowStore>, mirror: Arc<dyn RowStore>) -> Self {
        Self {
            disk,
            mirror,
            ledger: ChecksumLedger::new(),
            policies: HashMap::new(),
            commit_locks: std::array::from_fn(|_| Mutex::new(())),
            stats: EngineStats::default(),
        }
    }

    pub fn with_policy(mut self, domain: ConfigDomain, policy: DomainPolicy) -> Self {
        self.policies.insert(domain, policy);
        self
    }

    pub fn policy(&self, domain: ConfigDomain) -> DomainPolicy {
        self.policies.get(&domain).copied().unwrap_or_default()
    }

    pub fn ledger(&self) -> &ChecksumLedger {
        &self.ledger
    }

    pub fn get_checksum(&self, domain: ConfigDomain) -> ChecksumRecord {
        self.ledger.get(domain)
    }

    pub fn counters(&self) -> EngineCounters {
        self.stats.counters()
    }

    fn commit_lock(&self, domain: ConfigDomain) -> MutexGuard<'_, ()> {
        self.commit_locks[domain as usize].lock()
    }

    fn store(&self, source: LoadSource) -> &dyn RowStore {
        match source {
            LoadSource::Disk => self.disk.as_ref(),
            LoadSource::Mirror => self.mirror.as_ref(),
        }
    }

    // ── Load ─────────────────────────────────────────────────────

    /// Read stored rows, decode them, and replace the runtime set.
    ///
    /// Rows that fail to decode or validate are skipped and reported. If
    /// the domain's policy has `require_rows` and nothing valid remains,
    /// the runtime set is left untouched and the load fails.
    pub fn load_domain_to_runtime<R: DomainRow>(
        &self,
        target: &dyn RuntimeTarget<R>,
        source: LoadSource,
    ) -> Result<LoadReport, EngineError> {
        let domain = R::DOMAIN;
        let stored = self
            .store(source)
            .read_rows(domain.table_name())
            .map_err(|source| EngineError::Read { domain, source })?;

        let mut rows = Vec::with_capacity(stored.len());
        let mut rejected = Vec::new();
        for row in stored {
            let admitted = decode_row::<R>(&row.value)
                .and_then(|decoded| target.admit(&decoded).map(|()| decoded));
            match admitted {
                Ok(decoded) => rows.push(decoded),
                Err(reason) => {
                    warn!(%domain, key = %row.key, %reason, "skipping malformed row");
                    rejected.push(EngineError::Validation {
                        domain,
                        key: row.key,
                        reason,
                    });
                }
            }
        }
        self.stats
            .rows_skipped
            .fetch_add(rejected.len() as u64, Ordering::Relaxed);

        let (rows, duplicates) = canonicalize(rows);
        if duplicates > 0 {
            warn!(%domain, duplicates, "stored rows share a primary key; kept the last");
        }

        if rows.is_empty() && self.policy(domain).require_rows {
            error!(%domain, rejected = rejected.len(), "no valid rows in a required domain");
            return Err(EngineError::EmptyCriticalDomain(domain));
        }

        let loaded = rows.len();
        target.install(rows)?;
        bump(&self.stats.loads);
        info!(%domain, ?source, loaded, skipped = rejected.len(), "domain loaded to runtime");

        Ok(LoadReport {
            domain,
            source,
            loaded,
            rejected,
        })
    }

    // ── Save ─────────────────────────────────────────────────────

    /// Write the runtime set to the mirror (and disk), then bump the ledger.
    pub fn save_domain_from_runtime<R: DomainRow>(
        &self,
        target: &dyn RuntimeTarget<R>,
        flags: SaveFlags,
    ) -> Result<SaveOutcome, EngineError> {
        let domain = R::DOMAIN;
        // Held across the runtime read so concurrent saves commit in the
        // order they observed the runtime set.
        let _commit = self.commit_lock(domain);

        let runtime = target.snapshot()?;
        let (rows, duplicates) = canonicalize(runtime);
        if duplicates > 0 {
            debug!(%domain, duplicates, "runtime rows share a primary key; kept the last");
        }

        if flags.only_if_empty && rows.is_empty() {
            let disk_rows = self
                .disk
                .count(domain.table_name())
                .map_err(|source| EngineError::Read { domain, source })?;
            if disk_rows > 0 {
                bump(&self.stats.saves_skipped);
                warn!(%domain, disk_rows, "refusing to overwrite non-empty disk table with an empty set");
                return Ok(SaveOutcome::Skipped { disk_rows });
            }
        }

        let rows = if flags.replace {
            rows
        } else {
            self.merge_under_mirror(rows)?
        };

        let record = self.commit_locked(&rows, flags.persist)?;
        Ok(SaveOutcome::Saved(record))
    }

    /// Rows already in the mirror win; runtime rows fill in missing keys.
    fn merge_under_mirror<R: DomainRow>(&self, rows: Vec<R>) -> Result<Vec<R>, EngineError> {
        let domain = R::DOMAIN;
        let mut merged: BTreeMap<String, R> =
            rows.into_iter().map(|r| (r.primary_key(), r)).collect();
        let existing = self
            .mirror
            .read_rows(domain.table_name())
            .map_err(|source| EngineError::Read { domain, source })?;
        for stored in existing {
            match decode_row::<R>(&stored.value) {
                Ok(row) => {
                    merged.insert(row.primary_key(), row);
                }
                Err(reason) => {
                    warn!(%domain, key = %stored.key, %reason, "dropping malformed mirror row during merge");
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    fn prepare<R: DomainRow>(rows: &[R]) -> Result<PreparedRows, EngineError> {
        let domain = R::DOMAIN;
        let encode =
            |r: &R| encode_row(r).map_err(|source| EngineError::Transaction { domain, source });
        let canonical = rows.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        let derived = match R::DERIVED_TABLE {
            Some(name) => {
                let subset = rows
                    .iter()
                    .filter(|r| r.in_derived())
                    .map(encode)
                    .collect::<Result<Vec<_>, _>>()?;
                Some((name, subset))
            }
            None => None,
        };
        Ok(PreparedRows { canonical, derived })
    }

    /// Disk, mirror, ledger. Caller holds the domain's commit mutex.
    fn commit_locked<R: DomainRow>(
        &self,
        rows: &[R],
        persist: bool,
    ) -> Result<ChecksumRecord, EngineError> {
        let domain = R::DOMAIN;
        let prepared = Self::prepare(rows)?;
        if persist {
            self.write_table(self.disk.as_ref(), "disk", domain, &prepared)?;
        }
        self.write_table(self.mirror.as_ref(), "mirror", domain, &prepared)?;
        Ok(self.record_saved(domain, &prepared, persist, None))
    }

    fn write_table(
        &self,
        store: &dyn RowStore,
        kind: &'static str,
        domain: ConfigDomain,
        prepared: &PreparedRows,
    ) -> Result<(), EngineError> {
        if let Err(source) = store.replace_all(&prepared.writes(domain.table_name())) {
            bump(&self.stats.save_failures);
            error!(%domain, error = %source, "{kind} transaction failed; checksum unchanged");
            return Err(EngineError::Transaction { domain, source });
        }
        Ok(())
    }

    fn record_saved(
        &self,
        domain: ConfigDomain,
        prepared: &PreparedRows,
        persist: bool,
        remote: Option<u64>,
    ) -> ChecksumRecord {
        let record = self
            .ledger
            .update(domain, digest_rows(&prepared.canonical), remote);
        bump(&self.stats.saves);
        info!(
            %domain,
            rows = prepared.canonical.len(),
            persist,
            version = record.version,
            "domain saved"
        );
        record
    }

    /// What a store currently holds for a domain, in writable form.
    fn stored_tables<R: DomainRow>(store: &dyn RowStore) -> Result<PreparedRows, EngineError> {
        let domain = R::DOMAIN;
        let read = |table: &str| {
            store
                .read_rows(table)
                .map_err(|source| EngineError::Read { domain, source })
        };
        let canonical = read(domain.table_name())?;
        let derived = R::DERIVED_TABLE
            .map(|name| read(name).map(|rows| (name, rows)))
            .transpose()?;
        Ok(PreparedRows { canonical, derived })
    }

    fn restore_table(
        &self,
        store: &dyn RowStore,
        kind: &'static str,
        domain: ConfigDomain,
        previous: &PreparedRows,
    ) {
        match store.replace_all(&previous.writes(domain.table_name())) {
            Ok(()) => debug!(%domain, "{kind} rows restored"),
            Err(e) => error!(%domain, error = %e, "could not restore {kind} rows"),
        }
    }

    // ── Remote snapshots ─────────────────────────────────────────

    /// Decode a peer snapshot and check it against its advertised hash.
    ///
    /// Any undecodable or invalid row rejects the whole snapshot.
    pub fn decode_snapshot<R: DomainRow>(snapshot: &DomainSnapshot) -> Result<Vec<R>, EngineError> {
        let domain = R::DOMAIN;
        let invalid = |reason: String| EngineError::PayloadInvalid { domain, reason };

        if snapshot.domain != domain {
            return Err(invalid(format!(
                "snapshot is for {} not {domain}",
                snapshot.domain
            )));
        }

        let mut rows = Vec::with_capacity(snapshot.rows.len());
        for (i, value) in snapshot.rows.iter().enumerate() {
            let row: R = serde_json::from_value(value.clone())
                .map_err(|e| invalid(format!("row {i}: {e}")))?;
            row.validate().map_err(|e| invalid(format!("row {i}: {e}")))?;
            rows.push(row);
        }

        let (rows, duplicates) = canonicalize(rows);
        if duplicates > 0 {
            return Err(invalid(format!("{duplicates} duplicate primary keys")));
        }

        let encoded = rows
            .iter()
            .map(encode_row)
            .collect::<Result<Vec<_>, StateError>>()
            .map_err(|e| invalid(e.to_string()))?;
        let hash = digest_rows(&encoded);
        if hash != snapshot.hash {
            return Err(invalid(format!(
                "content hash {hash} does not match advertised {}",
                snapshot.hash
            )));
        }
        Ok(rows)
    }

    /// Apply a pulled snapshot when it wins against local state.
    ///
    /// The remote rows replace the runtime set and the ledger adopts the
    /// peer's version, so both nodes end up reporting the same
    /// `{version, hash}`. Rows the target does not admit reject the whole
    /// snapshot.
    pub fn apply_remote_snapshot<R: DomainRow>(
        &self,
        target: &dyn RuntimeTarget<R>,
        snapshot: &DomainSnapshot,
        persist: bool,
    ) -> Result<ChecksumRecord, EngineError> {
        let domain = R::DOMAIN;
        let decoded = Self::decode_snapshot::<R>(snapshot).and_then(|rows| {
            match rows.iter().find_map(|row| target.admit(row).err()) {
                Some(reason) => Err(EngineError::PayloadInvalid { domain, reason }),
                None => Ok(rows),
            }
        });
        let rows = match decoded {
            Ok(rows) => rows,
            Err(err) => {
                bump(&self.stats.remote_rejections);
                warn!(%domain, error = %err, "rejecting remote snapshot");
                return Err(err);
            }
        };

        let _commit = self.commit_lock(domain);
        let local = self.ledger.get(domain);
        if !remote_wins(snapshot.version, &snapshot.hash, &local) {
            debug!(%domain, remote = snapshot.version, local = local.version, "remote snapshot not newer");
            return Err(EngineError::StaleSnapshot {
                domain,
                remote_version: snapshot.version,
                local_version: local.version,
            });
        }

        // Stores first, runtime second, ledger last. Any failure puts the
        // stores back, so runtime, mirror, disk and ledger keep agreeing.
        let prepared = Self::prepare(&rows)?;
        let mirror_before = Self::stored_tables::<R>(self.mirror.as_ref())?;
        let disk_before = if persist {
            let before = Self::stored_tables::<R>(self.disk.as_ref())?;
            self.write_table(self.disk.as_ref(), "disk", domain, &prepared)?;
            Some(before)
        } else {
            None
        };
        let restore_disk = |disk_before: &Option<PreparedRows>| {
            if let Some(before) = disk_before {
                self.restore_table(self.disk.as_ref(), "disk", domain, before);
            }
        };

        if let Err(err) = self.write_table(self.mirror.as_ref(), "mirror", domain, &prepared) {
            restore_disk(&disk_before);
            return Err(err);
        }

        let count = rows.len();
        if let Err(timeout) = target.install(rows) {
            bump(&self.stats.save_failures);
            warn!(%domain, error = %timeout, "runtime busy; remote snapshot not applied");
            self.restore_table(self.mirror.as_ref(), "mirror", domain, &mirror_before);
            restore_disk(&disk_before);
            return Err(timeout.into());
        }

        let record = self.record_saved(domain, &prepared, persist, Some(snapshot.version));
        bump(&self.stats.remote_applies);
        info!(%domain, version = record.version, rows = count, "applied remote snapshot");
        Ok(record)
    }

    /// Mirror rows and the ledger record, read as one consistent pair.
    pub fn export_snapshot(&self, domain: ConfigDomain) -> Result<DomainSnapshot, EngineError> {
        let _commit = self.commit_lock(domain);
        let stored = self
            .mirror
            .read_rows(domain.table_name())
            .map_err(|source| EngineError::Read { domain, source })?;
        let record = self.ledger.get(domain);

        let rows = stored
            .iter()
            .map(|row| serde_json::from_slice(&row.value))
            .collect::<Result<Vec<serde_json::Value>, _>>()
            .map_err(|e| EngineError::Read {
                domain,
                source: StateError::Deserialize(e.to_string()),
            })?;

        Ok(DomainSnapshot {
            domain,
            version: record.version,
            hash: record.hash,
            rows,
        })
    }

    // ── Introspection ────────────────────────────────────────────

    /// Hash of the mirror's current content.
    pub fn compute_checksum(&self, domain: ConfigDomain) -> Result<String, EngineError> {
        let rows = self
            .mirror
            .read_rows(domain.table_name())
            .map_err(|source| EngineError::Read { domain, source })?;
        Ok(digest_rows(&rows))
    }

    /// Typed rows currently in the mirror.
    pub fn mirror_rows<R: DomainRow>(&self) -> Result<Vec<R>, EngineError> {
        let domain = R::DOMAIN;
        self.mirror
            .read_rows(domain.table_name())
            .map_err(|source| EngineError::Read { domain, source })?
            .into_iter()
            .map(|row| {
                decode_row(&row.value).map_err(|reason| EngineError::Validation {
                    domain,
                    key: row.key,
                    reason,
                })
            })
            .collect()
    }

    /// Copy the mirror to disk without touching runtime or the ledger.
    pub fn flush_mirror_to_disk<R: DomainRow>(&self) -> Result<usize, EngineError> {
        let domain = R::DOMAIN;
        let _commit = self.commit_lock(domain);
        let prepared = Self::stored_tables::<R>(self.mirror.as_ref())?;
        self.disk
            .replace_all(&prepared.writes(domain.table_name()))
            .map_err(|source| {
                bump(&self.stats.save_failures);
                error!(%domain, error = %source, "flushing mirror to disk failed");
                EngineError::Transaction { domain, source }
            })?;
        info!(%domain, rows = prepared.canonical.len(), "mirror flushed to disk");
        Ok(prepared.canonical.len())
    }

    /// Write every ledger record into the mirror's checksum table.
    pub fn dump_checksums(&self) -> Result<Vec<ChecksumRecord>, EngineError> {
        let records = self.ledger.all();
        let rows = records
            .iter()
            .map(|record| {
                serde_json::to_vec(record)
                    .map(|value| StoredRow::new(record.domain.as_str(), value))
                    .map_err(|e| StateError::Serialize(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineError::Dump)?;
        self.mirror
            .replace_all(&[TableWrite {
                table: CHECKSUMS,
                rows: &rows,
            }])
            .map_err(EngineError::Dump)?;
        debug!(domains = rows.len(), "checksums dumped to mirror");
        Ok(records)
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("policies", &self.policies)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}
