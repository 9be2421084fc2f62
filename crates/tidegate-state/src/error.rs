//! Error types for the Tidegate state layer.

use thiserror::Error;

use tidegate_core::{ConfigDomain, LockTimeout};

/// Result type alias for table store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur inside a table store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A single row failed to decode or validate.
    #[error("invalid {domain} row {key}: {reason}")]
    Validation {
        domain: ConfigDomain,
        key: String,
        reason: String,
    },

    /// A disk or mirror write did not commit; prior state is retained.
    #[error("transaction failed for {domain}: {source}")]
    Transaction {
        domain: ConfigDomain,
        #[source]
        source: StateError,
    },

    /// Reading stored rows failed.
    #[error("failed to read {domain}: {source}")]
    Read {
        domain: ConfigDomain,
        #[source]
        source: StateError,
    },

    /// A structurally critical domain ended up with zero valid rows.
    #[error("{0} has no valid rows; refusing to load an empty set")]
    EmptyCriticalDomain(ConfigDomain),

    /// A remote snapshot was malformed and rejected as a whole.
    #[error("remote {domain} payload rejected: {reason}")]
    PayloadInvalid { domain: ConfigDomain, reason: String },

    /// A remote snapshot lost against the local copy under the apply rule.
    #[error(
        "remote {domain} snapshot not newer (remote v{remote_version}, local v{local_version})"
    )]
    StaleSnapshot {
        domain: ConfigDomain,
        remote_version: u64,
        local_version: u64,
    },

    /// Writing the ledger dump into the mirror failed.
    #[error("checksum dump failed: {0}")]
    Dump(#[source] StateError),

    #[error(transparent)]
    Lock(#[from] LockTimeout),
}

impl EngineError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, EngineError::Lock(_))
    }
}
