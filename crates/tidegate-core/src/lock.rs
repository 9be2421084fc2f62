//! Admin lock: the one mutual-exclusion primitive used for shared
//! admin state.
//!
//! The flavour is picked once at startup ([`LockSettings`]) and every
//! domain group builds its lock from the same settings:
//!
//! - [`LockKind::ReadWrite`]: `parking_lot::RwLock`. Readers share the lock;
//!   the lock is eventually fair, so a steady stream of writers cannot
//!   starve readers.
//! - [`LockKind::Exclusive`]: `parking_lot::Mutex`. Readers and writers
//!   both take the lock exclusively.
//!
//! Acquisition is bounded by the configured timeout. Running out of time
//! is reported as [`LockTimeout`], which callers surface as a distinct
//! failure rather than a data error.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Which primitive backs an [`AdminLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    #[default]
    ReadWrite,
    Exclusive,
}

/// Lock acquisition ran past its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} acquiring the {name} lock")]
pub struct LockTimeout {
    pub name: &'static str,
    pub waited: Duration,
}

/// Startup-time lock choice shared by every admin lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub kind: LockKind,
    pub timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            kind: LockKind::ReadWrite,
            timeout: Duration::from_secs(2),
        }
    }
}

impl LockSettings {
    pub fn new(kind: LockKind, timeout: Duration) -> Self {
        Self { kind, timeout }
    }

    /// Build a named lock around `value`.
    pub fn build<T>(&self, name: &'static str, value: T) -> AdminLock<T> {
        AdminLock::new(name, *self, value)
    }
}

enum Inner<T> {
    ReadWrite(RwLock<T>),
    Exclusive(Mutex<T>),
}

/// A named lock with bounded acquisition.
pub struct AdminLock<T> {
    name: &'static str,
    timeout: Duration,
    inner: Inner<T>,
}

impl<T> AdminLock<T> {
    pub fn new(name: &'static str, settings: LockSettings, value: T) -> Self {
        let inner = match settings.kind {
            LockKind::ReadWrite => Inner::ReadWrite(RwLock::new(value)),
            LockKind::Exclusive => Inner::Exclusive(Mutex::new(value)),
        };
        Self {
            name,
            timeout: settings.timeout,
            inner,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> LockKind {
        match self.inner {
            Inner::ReadWrite(_) => LockKind::ReadWrite,
            Inner::Exclusive(_) => LockKind::Exclusive,
        }
    }

    /// Acquire shared access.
    pub fn read(&self) -> Result<ReadGuard<'_, T>, LockTimeout> {
        let guard = match &self.inner {
            Inner::ReadWrite(lock) => lock.try_read_for(self.timeout).map(ReadGuard::Shared),
            Inner::Exclusive(lock) => lock.try_lock_for(self.timeout).map(ReadGuard::Exclusive),
        };
        guard.ok_or_else(|| self.timed_out())
    }

    /// Acquire exclusive access.
    pub fn write(&self) -> Result<WriteGuard<'_, T>, LockTimeout> {
        let guard = match &self.inner {
            Inner::ReadWrite(lock) => lock.try_write_for(self.timeout).map(WriteGuard::Unique),
            Inner::Exclusive(lock) => lock.try_lock_for(self.timeout).map(WriteGuard::Exclusive),
        };
        guard.ok_or_else(|| self.timed_out())
    }

    fn timed_out(&self) -> LockTimeout {
        warn!(lock = self.name, timeout = ?self.timeout, "lock acquisition timed out");
        LockTimeout {
            name: self.name,
            waited: self.timeout,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AdminLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminLock")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Shared access to the value behind an [`AdminLock`].
pub enum ReadGuard<'a, T> {
    Shared(RwLockReadGuard<'a, T>),
    Exclusive(MutexGuard<'a, T>),
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            ReadGuard::Shared(g) => g,
            ReadGuard::Exclusive(g) => g,
        }
    }
}

/// Exclusive access to the value behind an [`AdminLock`].
pub enum WriteGuard<'a, T> {
    Unique(RwLockWriteGuard<'a, T>),
    Exclusive(MutexGuard<'a, T>),
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            WriteGuard::Unique(g) => g,
            WriteGuard::Exclusive(g) => g,
        }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            WriteGuard::Unique(g) => g,
            WriteGuard::Exclusive(g) => g,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kind: LockKind) -> LockSettings {
        LockSettings::new(kind, Duration::from_millis(20))
    }

    #[test]
    fn read_write_lock_shares_readers() {
        let lock = settings(LockKind::ReadWrite).build("test", 5u32);
        let a = lock.read().unwrap();
        let b = lock.read().unwrap();
        assert_eq!(*a + *b, 10);
    }

    #[test]
    fn writer_times_out_while_reader_holds() {
        let lock = settings(LockKind::ReadWrite).build("servers", Vec::<u32>::new());
        let _reader = lock.read().unwrap();
        let Err(err) = lock.write() else {
            panic!("writer acquired the lock while a reader held it");
        };
        assert_eq!(err.name, "servers");
        assert_eq!(err.waited, Duration::from_millis(20));
    }

    #[test]
    fn exclusive_lock_serializes_readers() {
        let lock = settings(LockKind::Exclusive).build("admin", 1u8);
        assert_eq!(lock.kind(), LockKind::Exclusive);
        let _first = lock.read().unwrap();
        assert!(lock.read().is_err());
    }

    #[test]
    fn write_guard_mutates_value() {
        for kind in [LockKind::ReadWrite, LockKind::Exclusive] {
            let lock = settings(kind).build("jobs", vec![1, 2]);
            lock.write().unwrap().push(3);
            assert_eq!(*lock.read().unwrap(), vec![1, 2, 3]);
        }
    }

    #[test]
    fn lock_kind_parses_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            kind: LockKind,
        }
        let w: Wrap = toml::from_str("kind = \"exclusive\"").unwrap();
        assert_eq!(w.kind, LockKind::Exclusive);
    }
}
