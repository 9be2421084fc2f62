//! TableStore: redb-backed row tables for Tidegate.
//!
//! The same store type backs both representations the engine keeps
//! besides runtime: the persistent DiskTable (file-backed database) and
//! the queryable MirrorTable (in-memory database). Rows are opaque
//! `(key, JSON bytes)` pairs; typing happens in the engine.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{all_tables, table};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A stored row: primary key plus encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub key: String,
    pub value: Vec<u8>,
}

impl StoredRow {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Replace the full content of one table.
#[derive(Debug, Clone, Copy)]
pub struct TableWrite<'a> {
    pub table: &'a str,
    pub rows: &'a [StoredRow],
}

/// Row storage used by the reconciliation engine.
///
/// `replace_all` must be atomic across every table it touches: either all
/// writes commit or none are visible.
pub trait RowStore: Send + Sync {
    /// All rows of a table, in key order.
    fn read_rows(&self, table: &str) -> StateResult<Vec<StoredRow>>;

    /// Number of rows in a table.
    fn count(&self, table: &str) -> StateResult<u64> {
        Ok(self.read_rows(table)?.len() as u64)
    }

    /// Replace the content of every listed table in one transaction.
    fn replace_all(&self, writes: &[TableWrite<'_>]) -> StateResult<()>;
}

/// Thread-safe row store backed by redb.
#[derive(Clone)]
pub struct TableStore {
    db: Arc<Database>,
}

impl TableStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "table store opened");
        Ok(store)
    }

    /// Create an in-memory store (the mirror, and tests).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory table store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for name in all_tables() {
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(table(name)).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl RowStore for TableStore {
    fn read_rows(&self, name: &str) -> StateResult<Vec<StoredRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table(name)).map_err(map_err!(Table))?;
        let mut rows = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            rows.push(StoredRow::new(key.value(), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn replace_all(&self, writes: &[TableWrite<'_>]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for write in writes {
            // Drop and recreate inside the transaction: delete-then-insert
            // is only visible once the commit lands.
            txn.delete_table(table(write.table)).map_err(map_err!(Table))?;
            let mut t = txn.open_table(table(write.table)).map_err(map_err!(Table))?;
            for row in write.rows {
                t.insert(row.key.as_str(), row.value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tables = writes.len(), "tables replaced");
        Ok(())
    }
}
