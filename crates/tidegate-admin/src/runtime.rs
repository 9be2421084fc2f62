//! Runtime sets of the general admin domains.
//!
//! Users, query rules, firewall entries, cluster peers and variables share
//! one lock. The server pool is read on every routed query and keeps a lock
//! of its own; scheduler jobs live inside the `JobScheduler`.

use tidegate_core::{AdminLock, LockSettings, LockTimeout, ReadGuard};
use tidegate_state::{FirewallUser, PeerRow, QueryRule, RuntimeTarget, UserAccount, Variable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralDomains {
    pub users: Vec<UserAccount>,
    pub query_rules: Vec<QueryRule>,
    pub firewall: Vec<FirewallUser>,
    pub cluster_peers: Vec<PeerRow>,
    pub variables: Vec<Variable>,
}

pub struct GeneralRuntime {
    domains: AdminLock<GeneralDomains>,
}

impl GeneralRuntime {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            domains: settings.build("general", GeneralDomains::default()),
        }
    }

    pub fn read(&self) -> Result<ReadGuard<'_, GeneralDomains>, LockTimeout> {
        self.domains.read()
    }

    pub fn update<T>(&self, edit: impl FnOnce(&mut GeneralDomains) -> T) -> Result<T, LockTimeout> {
        let mut domains = self.domains.write()?;
        Ok(edit(&mut domains))
    }
}

macro_rules! general_target {
    ($row:ty, $field:ident) => {
        impl RuntimeTarget<$row> for GeneralRuntime {
            fn snapshot(&self) -> Result<Vec<$row>, LockTimeout> {
                Ok(self.domains.read()?.$field.clone())
            }

            fn install(&self, rows: Vec<$row>) -> Result<(), LockTimeout> {
                self.domains.write()?.$field = rows;
                Ok(())
            }
        }
    };
}

general_target!(UserAccount, users);
general_target!(QueryRule, query_rules);
general_target!(FirewallUser, firewall);
general_target!(PeerRow, cluster_peers);
general_target!(Variable, variables);
