//! Per-domain row descriptor.
//!
//! A [`DomainRow`] is the descriptor the generic engine needs for one
//! domain: the row codec (serde JSON), the storage key (the domain's table),
//! and the canonicalization rule (the primary key).

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use tidegate_core::ConfigDomain;

use crate::error::{StateError, StateResult};
use crate::store::StoredRow;

/// A typed configuration row belonging to exactly one domain.
pub trait DomainRow:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    const DOMAIN: ConfigDomain;

    /// Derived table regenerated from the rows on every save.
    const DERIVED_TABLE: Option<&'static str> = None;

    /// Primary key; rows are sorted by it before hashing and storage.
    fn primary_key(&self) -> String;

    /// Semantic checks beyond what decoding enforces.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Whether the row belongs in [`DomainRow::DERIVED_TABLE`].
    fn in_derived(&self) -> bool {
        false
    }
}

/// Encode one row for storage.
pub fn encode_row<R: DomainRow>(row: &R) -> StateResult<StoredRow> {
    let value = serde_json::to_vec(row).map_err(|e| StateError::Serialize(e.to_string()))?;
    Ok(StoredRow::new(row.primary_key(), value))
}

/// Decode and validate one stored value.
pub fn decode_row<R: DomainRow>(value: &[u8]) -> Result<R, String> {
    let row: R = serde_json::from_slice(value).map_err(|e| e.to_string())?;
    row.validate()?;
    Ok(row)
}

/// Sort rows by primary key, keeping the last row written for a key.
///
/// Returns the canonical rows and how many duplicates were dropped.
pub fn canonicalize<R: DomainRow>(rows: Vec<R>) -> (Vec<R>, usize) {
    let total = rows.len();
    let mut by_key = BTreeMap::new();
    for row in rows {
        by_key.insert(row.primary_key(), row);
    }
    let canonical: Vec<R> = by_key.into_values().collect();
    let dropped = total - canonical.len();
    (canonical, dropped)
}
