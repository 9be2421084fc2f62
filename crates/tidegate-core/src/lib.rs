//! tidegate-core: shared building blocks for the Tidegate admin plane.
//!
//! - [`ConfigDomain`]: the enumerated configuration categories that flow
//!   through reconciliation and cluster sync.
//! - [`AdminConfig`]: TOML configuration for the daemon and its subsystems.
//! - [`AdminLock`]: the single read/write lock abstraction, with its
//!   flavour chosen once at startup through [`LockSettings`].

pub mod config;
pub mod domain;
pub mod lock;

pub use config::{
    AdminConfig, ArgumentMode, ClusterConfig, ConfigError, DomainConfig, DomainSyncConfig,
    LoadSource, SchedulerConfig,
};
pub use domain::{ConfigDomain, UnknownDomain};
pub use lock::{AdminLock, LockKind, LockSettings, LockTimeout, ReadGuard, WriteGuard};

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
