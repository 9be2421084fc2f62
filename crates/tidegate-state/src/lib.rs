//! tidegate-state: reconciliation of admin configuration across runtime,
//! mirror, and disk.
//!
//! # Architecture
//!
//! Every domain exists in three representations:
//!
//! - the **runtime set** ([`RuntimeSet`]), typed rows read by the serving path;
//! - the **mirror**, an in-memory redb database reflecting the last save;
//! - the **disk table**, a file-backed redb database that survives restarts.
//!
//! The [`ReconciliationEngine`] moves rows between them and is the only
//! writer of the [`ChecksumLedger`]. Rows are JSON-serialized into redb's
//! `&[u8]` value columns, keyed by their domain's primary key.
//!
//! [`DomainReconciler`] is the object-safe seam the cluster layer uses to
//! read checksums, export snapshots, and apply pulled ones.

pub mod checksum;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod row;
pub mod runtime;
pub mod store;
pub mod tables;
pub mod types;

pub use checksum::{ChecksumLedger, ChecksumRecord, digest_rows, empty_hash};
pub use engine::{
    DomainPolicy, EngineCounters, LoadReport, ReconciliationEngine, SaveFlags, SaveOutcome,
};
pub use error::{EngineError, StateError, StateResult};
pub use reconciler::{DomainReconciler, DomainSnapshot, remote_wins};
pub use row::{DomainRow, canonicalize, decode_row, encode_row};
pub use runtime::{RuntimeSet, RuntimeTarget};
pub use store::{RowStore, StoredRow, TableStore, TableWrite};
pub use types::*;
