//! redb table definitions for the Tidegate stores.
//!
//! Each configuration domain gets one `&str → &[u8]` table named after the
//! domain, holding JSON-encoded rows keyed by their primary key. Derived
//! tables and the checksum dump sit beside them.

use redb::TableDefinition;

use tidegate_core::ConfigDomain;

/// Active, enforcing firewall entries regenerated on every firewall save.
pub const FIREWALL_WHITELIST: &str = "firewall_whitelist";

/// Introspection dump of the checksum ledger, keyed by domain.
pub const CHECKSUMS: &str = "checksums";

/// Build a table definition for any named table.
pub fn table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Every table a store creates on open.
pub fn all_tables() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ConfigDomain::ALL.iter().map(|d| d.table_name()).collect();
    names.push(FIREWALL_WHITELIST);
    names.push(CHECKSUMS);
    names
}
