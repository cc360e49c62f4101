//! Per-repo advisory lock.
//!
//! Serializes shadow-ref mutation between the daemon and foreground
//! commands. The lock is `flock(2)` on `<gitdir>/pulsar.lock`; acquisition
//! is non-blocking and contenders skip the current cycle. The zero-length
//! lock file persists between cycles; the kernel drops the lock when the
//! guard (or the process) goes away, so every exit path releases it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum RepoLockError {
    #[error("lock {path:?} is held by another process")]
    Held { path: PathBuf },

    #[error("failed to open lock {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flock on {path:?} failed: {errno}")]
    Flock { path: PathBuf, errno: nix::errno::Errno },
}

/// Held advisory lock for one repository. Dropping releases it.
pub struct RepoLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl RepoLock {
    /// Try to take the lock without blocking.
    pub fn try_acquire(git_dir: &Path) -> Result<Self, RepoLockError> {
        let path = paths::repo_lock_path(git_dir);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| RepoLockError::Open {
                path: path.clone(),
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Self {
                _flock: flock,
                path,
            }),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Err(RepoLockError::Held { path }),
            Err((_, errno)) => Err(RepoLockError::Flock { path, errno }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
