//! Configuration domains.
//!
//! Every domain has its own row schema, its own persisted table, and its
//! own checksum. The table name doubles as the domain's wire identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An enumerated category of proxy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigDomain {
    /// Backend server pool (hostgroups).
    ServerPool,
    /// Frontend/backend user credentials.
    Users,
    /// Query routing rules.
    QueryRules,
    /// Firewall whitelist entries.
    Firewall,
    /// External scheduler jobs.
    Scheduler,
    /// Cluster peer list.
    ClusterPeers,
    /// Global variables.
    Variables,
}

impl ConfigDomain {
    /// All domains, in the order they are bootstrapped.
    pub const ALL: [ConfigDomain; 7] = [
        ConfigDomain::ServerPool,
        ConfigDomain::Users,
        ConfigDomain::QueryRules,
        ConfigDomain::Firewall,
        ConfigDomain::Scheduler,
        ConfigDomain::ClusterPeers,
        ConfigDomain::Variables,
    ];

    /// Stable identifier, used as table name, config key, and wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConfigDomain::ServerPool => "server_pool",
            ConfigDomain::Users => "users",
            ConfigDomain::QueryRules => "query_rules",
            ConfigDomain::Firewall => "firewall",
            ConfigDomain::Scheduler => "scheduler",
            ConfigDomain::ClusterPeers => "cluster_peers",
            ConfigDomain::Variables => "variables",
        }
    }

    /// Name of the canonical table holding this domain's rows.
    pub const fn table_name(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ConfigDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown domain name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown config domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for ConfigDomain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}
