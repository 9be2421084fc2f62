//! Domain row types for the Tidegate admin plane.
//!
//! These are the typed rows of every domain except the scheduler, whose
//! row lives with the job scheduler. All types serialize to JSON for
//! storage in redb tables and for peer snapshots.

use serde::{Deserialize, Serialize};

use tidegate_core::ConfigDomain;

use crate::row::DomainRow;
use crate::tables::FIREWALL_WHITELIST;

// ── Server pool ──────────────────────────────────────────────────

/// Administrative status of a backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Online,
    Shunned,
    OfflineSoft,
    OfflineHard,
}

/// A backend database server in a hostgroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServer {
    pub hostgroup_id: u32,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub status: ServerStatus,
    pub weight: u32,
    pub max_connections: u32,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub comment: String,
}

impl DomainRow for BackendServer {
    const DOMAIN: ConfigDomain = ConfigDomain::ServerPool;

    fn primary_key(&self) -> String {
        format!("{:010}:{}:{:05}", self.hostgroup_id, self.hostname, self.port)
    }

    fn validate(&self) -> Result<(), String> {
        if self.hostname.trim().is_empty() {
            return Err("hostname is empty".into());
        }
        if self.port == 0 {
            return Err("port must be non-zero".into());
        }
        Ok(())
    }
}

// ── Users ────────────────────────────────────────────────────────

/// Credentials for a frontend and/or backend user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
    pub active: bool,
    pub default_hostgroup: u32,
    pub frontend: bool,
    pub backend: bool,
    pub max_connections: u32,
    #[serde(default)]
    pub comment: String,
}

impl DomainRow for UserAccount {
    const DOMAIN: ConfigDomain = ConfigDomain::Users;

    fn primary_key(&self) -> String {
        format!("{}:{}{}", self.username, self.frontend as u8, self.backend as u8)
    }

    fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("username is empty".into());
        }
        if !self.frontend && !self.backend {
            return Err("user must be frontend, backend, or both".into());
        }
        Ok(())
    }
}

// ── Query rules ──────────────────────────────────────────────────

/// A query routing rule, evaluated in `rule_id` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRule {
    pub rule_id: u32,
    pub active: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub match_pattern: Option<String>,
    #[serde(default)]
    pub destination_hostgroup: Option<u32>,
    pub apply: bool,
    #[serde(default)]
    pub comment: String,
}

impl DomainRow for QueryRule {
    const DOMAIN: ConfigDomain = ConfigDomain::QueryRules;

    fn primary_key(&self) -> String {
        format!("{:010}", self.rule_id)
    }
}

// ── Firewall ─────────────────────────────────────────────────────

/// Enforcement mode of a firewall whitelist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallMode {
    #[default]
    Off,
    Detecting,
    Protecting,
}

/// A firewall whitelist entry for a user connecting from an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallUser {
    pub active: bool,
    pub username: String,
    pub client_address: String,
    pub mode: FirewallMode,
    #[serde(default)]
    pub comment: String,
}

impl DomainRow for FirewallUser {
    const DOMAIN: ConfigDomain = ConfigDomain::Firewall;
    const DERIVED_TABLE: Option<&'static str> = Some(FIREWALL_WHITELIST);

    fn primary_key(&self) -> String {
        format!("{}:{}", self.username, self.client_address)
    }

    fn validate(&self) -> Result<(), String> {
        if self.username.is_empty() {
            return Err("username is empty".into());
        }
        Ok(())
    }

    fn in_derived(&self) -> bool {
        self.active && self.mode != FirewallMode::Off
    }
}

// ── Cluster peers ────────────────────────────────────────────────

/// Another proxy instance participating in config sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRow {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub comment: String,
}

impl PeerRow {
    /// `host:port` address used to reach the peer.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl DomainRow for PeerRow {
    const DOMAIN: ConfigDomain = ConfigDomain::ClusterPeers;

    fn primary_key(&self) -> String {
        format!("{}:{:05}", self.hostname, self.port)
    }

    fn validate(&self) -> Result<(), String> {
        if self.hostname.is_empty() {
            return Err("hostname is empty".into());
        }
        if self.port == 0 {
            return Err("port must be non-zero".into());
        }
        Ok(())
    }
}

// ── Variables ────────────────────────────────────────────────────

/// A global `name = value` setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl DomainRow for Variable {
    const DOMAIN: ConfigDomain = ConfigDomain::Variables;

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("variable name is empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{canonicalize, decode_row, encode_row};

    fn server(hostgroup_id: u32, hostname: &str, port: u16) -> BackendServer {
        BackendServer {
            hostgroup_id,
            hostname: hostname.to_string(),
            port,
            status: ServerStatus::Online,
            weight: 1,
            max_connections: 100,
            use_ssl: false,
            comment: String::new(),
        }
    }

    #[test]
    fn server_keys_sort_numerically_by_hostgroup() {
        let a = server(2, "db-a", 3306).primary_key();
        let b = server(10, "db-a", 3306).primary_key();
        assert!(a < b);
    }

    #[test]
    fn server_validation_rejects_port_zero() {
        let row = server(1, "db-a", 0);
        assert!(row.validate().is_err());
    }

    #[test]
    fn decode_applies_defaults_and_validation() {
        let json = br#"{"hostgroup_id":1,"hostname":"db-a","port":3306,"weight":1,"max_connections":10}"#;
        let row: BackendServer = decode_row(json).unwrap();
        assert_eq!(row.status, ServerStatus::Online);
        assert!(row.comment.is_empty());

        let bad = br#"{"hostgroup_id":1,"hostname":"","port":3306,"weight":1,"max_connections":10}"#;
        assert!(decode_row::<BackendServer>(bad).is_err());
    }

    #[test]
    fn canonicalize_keeps_last_duplicate() {
        let mut first = server(1, "db-a", 3306);
        first.weight = 1;
        let mut second = server(1, "db-a", 3306);
        second.weight = 9;
        let (rows, dropped) = canonicalize(vec![server(5, "db-z", 3306), first, second]);
        assert_eq!(dropped, 1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].weight, 9);
        assert_eq!(rows[1].hostgroup_id, 5);
    }

    #[test]
    fn firewall_whitelist_membership() {
        let mut entry = FirewallUser {
            active: true,
            username: "app".to_string(),
            client_address: "10.0.0.5".to_string(),
            mode: FirewallMode::Protecting,
            comment: String::new(),
        };
        assert!(entry.in_derived());
        entry.mode = FirewallMode::Off;
        assert!(!entry.in_derived());
    }

    #[test]
    fn user_must_have_a_role() {
        let user = UserAccount {
            username: "app".to_string(),
            password: "secret".to_string(),
            active: true,
            default_hostgroup: 0,
            frontend: false,
            backend: false,
            max_connections: 100,
            comment: String::new(),
        };
        assert!(user.validate().is_err());
        let encoded = encode_row(&user).unwrap();
        assert_eq!(encoded.key, "app:00");
    }

    #[test]
    fn peer_address_joins_host_and_port() {
        let peer = PeerRow {
            hostname: "10.0.0.2".to_string(),
            port: 6032,
            weight: 0,
            comment: String::new(),
        };
        assert_eq!(peer.address(), "10.0.0.2:6032");
    }
}
