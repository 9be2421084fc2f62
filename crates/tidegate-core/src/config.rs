//! tidegate.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ConfigDomain;
use crate::lock::{LockKind, LockSettings};

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where `load_domain_to_runtime` reads rows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    #[default]
    Disk,
    Mirror,
}

/// How scheduler job arguments are constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentMode {
    /// Any number of positional arguments.
    #[default]
    Unbounded,
    /// At most five arguments, matching the historical column layout.
    Legacy5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub admin: AdminSection,
    pub cluster: ClusterConfig,
    /// Per-domain load/checksum behaviour keyed by domain name.
    pub domains: BTreeMap<String, DomainConfig>,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    pub data_dir: PathBuf,
    pub lock_kind: LockKind,
    pub lock_timeout_ms: u64,
    pub load_source: LoadSource,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/tidegate"),
            lock_kind: LockKind::ReadWrite,
            lock_timeout_ms: 2000,
            load_source: LoadSource::Disk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Listen address for peer polls and metrics.
    pub listen: String,
    /// Address this node is known by in the peer list; excluded from polling.
    pub advertise: Option<String>,
    pub username: String,
    pub password: String,
    pub check_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    /// Log a per-peer status summary every N polls (0 disables).
    pub check_status_frequency: u32,
    /// Per-domain sync behaviour keyed by domain name.
    pub domains: BTreeMap<String, DomainSyncConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6032".to_string(),
            advertise: None,
            username: "cluster".to_string(),
            password: "cluster".to_string(),
            check_interval_ms: 1000,
            rpc_timeout_ms: 500,
            check_status_frequency: 10,
            domains: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSyncConfig {
    /// Consecutive divergent polls before pulling; 0 disables pulling.
    pub diffs_before_sync: u32,
    /// Persist pulled snapshots to disk.
    pub save_to_disk: bool,
}

impl Default for DomainSyncConfig {
    fn default() -> Self {
        Self {
            diffs_before_sync: 3,
            save_to_disk: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Fail the load when no valid rows remain.
    pub require_rows: bool,
    /// Advertise and compare this domain's checksum across the cluster.
    pub checksum: bool,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            require_rows: false,
            checksum: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest sleep between ticks when no job is due sooner.
    pub max_idle_ms: u64,
    pub argument_mode: ArgumentMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_idle_ms: 1000,
            argument_mode: ArgumentMode::Unbounded,
        }
    }
}

impl AdminConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AdminConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("admin.lock_timeout_ms must be > 0".into()));
        }
        if self.cluster.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("cluster.check_interval_ms must be > 0".into()));
        }
        if self.cluster.rpc_timeout_ms >= self.cluster.check_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "cluster.rpc_timeout_ms ({}) must be shorter than cluster.check_interval_ms ({})",
                self.cluster.rpc_timeout_ms, self.cluster.check_interval_ms
            )));
        }
        if self.scheduler.max_idle_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.max_idle_ms must be > 0".into()));
        }
        for key in self.domains.keys().chain(self.cluster.domains.keys()) {
            key.parse::<ConfigDomain>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings::new(
            self.admin.lock_kind,
            Duration::from_millis(self.admin.lock_timeout_ms),
        )
    }

    /// Load/checksum behaviour for a domain, defaulted when unconfigured.
    pub fn domain(&self, domain: ConfigDomain) -> DomainConfig {
        self.domains.get(domain.as_str()).copied().unwrap_or_default()
    }

    /// Cluster sync behaviour for a domain, defaulted when unconfigured.
    pub fn sync_for(&self, domain: ConfigDomain) -> DomainSyncConfig {
        self.cluster
            .domains
            .get(domain.as_str())
            .copied()
            .unwrap_or_default()
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl ClusterConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
