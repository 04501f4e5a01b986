//! Process-level catalog lock.
//!
//! One exclusive, non-blocking `flock` on the marker file at the catalog
//! root. A second process gets [`LockOutcome::Held`] immediately instead of
//! waiting.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::utils::{CatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another process holds the lock. Not an error.
    Held,
}

/// An acquired lock; dropping it releases the flock and closes the file.
pub struct CatalogLock {
    _file: Flock<File>,
}

impl std::fmt::Debug for CatalogLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogLock").finish_non_exhaustive()
    }
}

impl CatalogLock {
    /// Try once to lock `path`. `Ok(None)` when someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| CatalogError::LockOpen {
                path: path.to_path_buf(),
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => Ok(Some(Self { _file: locked })),
            Err((_file, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_file, errno)) => Err(CatalogError::Lock {
                path: path.to_path_buf(),
                source: errno,
            }),
        }
    }
}
