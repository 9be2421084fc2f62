//! Runtime record sets: the live rows the serving path reads.

use tidegate_core::{AdminLock, LockSettings, LockTimeout, ReadGuard};

/// Where the engine reads runtime rows from and installs them into.
///
/// Implementors hold the write side only for the swap itself; the engine
/// never performs I/O while holding a runtime lock.
pub trait RuntimeTarget<R>: Send + Sync {
    /// Copy of the current rows, taken under the read side of the lock.
    fn snapshot(&self) -> Result<Vec<R>, LockTimeout>;

    /// Atomically replace the current rows.
    fn install(&self, rows: Vec<R>) -> Result<(), LockTimeout>;

    /// Checks that depend on the target's own configuration, run on every
    /// row before it is loaded or applied.
    fn admit(&self, _row: &R) -> Result<(), String> {
        Ok(())
    }
}

/// A domain's rows behind their own [`AdminLock`].
#[derive(Debug)]
pub struct RuntimeSet<R> {
    rows: AdminLock<Vec<R>>,
}

impl<R> RuntimeSet<R> {
    pub fn new(name: &'static str, settings: LockSettings) -> Self {
        Self {
            rows: settings.build(name, Vec::new()),
        }
    }

    /// Shared access for the serving path.
    pub fn read(&self) -> Result<ReadGuard<'_, Vec<R>>, LockTimeout> {
        self.rows.read()
    }

    /// Run an in-place edit under the write lock.
    pub fn update<T>(&self, edit: impl FnOnce(&mut Vec<R>) -> T) -> Result<T, LockTimeout> {
        let mut rows = self.rows.write()?;
        Ok(edit(&mut rows))
    }
}

impl<R: Clone + Send + Sync> RuntimeTarget<R> for RuntimeSet<R> {
    fn snapshot(&self) -> Result<Vec<R>, LockTimeout> {
        Ok(self.rows.read()?.clone())
    }

    fn install(&self, rows: Vec<R>) -> Result<(), LockTimeout> {
        *self.rows.write()? = rows;
        Ok(())
    }
}
