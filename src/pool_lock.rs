//! Per-pool mutual exclusion.
//!
//! Refreshing a pool invalidates the backend's cached pool metadata, so a
//! refresh racing a volume creation in the same pool can corrupt naming and
//! capacity accounting on the host. [`PoolLocks`] hands out one lock per pool
//! name: operations against the same pool are totally ordered, operations
//! against different pools never contend.
//!
//! A registry built with [`PoolLocks::with_lock_dir`] also takes an advisory
//! `flock` on `<dir>/<pool>.lock`, which extends the ordering to every process
//! sharing that directory. The in-process mutex is always taken first.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::OpenOptions;
use cap_std::fs_utf8::Dir;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use thiserror::Error;

/// Errors raised while taking the cross-process lock for a pool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolLockError {
    /// Raised when the lock directory or lock file cannot be used.
    #[error("failed to {action} `{path}`: {message}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Lock directory or file involved.
        path: String,
        /// Operating system error string.
        message: String,
    },
}

impl PoolLockError {
    fn io(action: &'static str, path: &Utf8Path, err: &io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Registry of pool locks, created lazily on first use and kept for the
/// lifetime of the registry.
#[derive(Debug, Default)]
pub struct PoolLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    lock_dir: Option<Utf8PathBuf>,
}

impl PoolLocks {
    /// Creates an empty registry whose locks only order threads of this
    /// process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that also serialises other processes using
    /// the same `lock_dir`. The directory is created on first acquisition.
    #[must_use]
    pub fn with_lock_dir(lock_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            table: Mutex::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    /// Directory holding the per-pool lock files, if any.
    #[must_use]
    pub fn lock_dir(&self) -> Option<&Utf8Path> {
        self.lock_dir.as_deref()
    }

    /// Blocks until the lock for `pool` is free and returns a guard holding
    /// it. The lock is released when the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolLockError::Io`] when the lock file cannot be created or
    /// locked. The in-process lock is released again before returning.
    pub fn acquire(&self, pool: &str) -> Result<PoolGuard, PoolLockError> {
        let lock = self.entry(pool);
        tracing::debug!(pool, "waiting for pool lock");
        let guard = lock.lock_arc();
        let file = self
            .lock_dir
            .as_deref()
            .map(|dir| PoolFileLock::acquire(dir, pool))
            .transpose()?;
        tracing::debug!(pool, "pool lock acquired");
        Ok(PoolGuard {
            pool: pool.to_owned(),
            file,
            _guard: guard,
        })
    }

    /// Number of pools that have been locked at least once.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns `true` when no pool has been locked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    fn entry(&self, pool: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        Arc::clone(table.entry(pool.to_owned()).or_default())
    }
}

/// Exclusive hold on one pool. Dropping the guard releases the pool.
///
/// Field order matters: the file lock is released before the in-process
/// mutex, so a waiting thread never blocks on a file lock this guard still
/// holds.
pub struct PoolGuard {
    pool: String,
    file: Option<PoolFileLock>,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl fmt::Debug for PoolGuard {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PoolGuard")
            .field("pool", &self.pool)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

impl PoolGuard {
    /// Name of the locked pool.
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Releases the pool explicitly.
    pub fn release(self) {
        tracing::debug!(pool = %self.pool, "releasing pool lock");
        drop(self);
    }
}

/// Advisory `flock` held on a pool's lock file.
#[derive(Debug)]
struct PoolFileLock {
    file: File,
    path: Utf8PathBuf,
}

impl PoolFileLock {
    fn acquire(dir: &Utf8Path, pool: &str) -> Result<Self, PoolLockError> {
        Dir::create_ambient_dir_all(dir, ambient_authority())
            .map_err(|err| PoolLockError::io("create lock directory", dir, &err))?;
        let handle = Dir::open_ambient_dir(dir, ambient_authority())
            .map_err(|err| PoolLockError::io("open lock directory", dir, &err))?;

        let file_name = lock_file_name(pool);
        let path = dir.join(&file_name);
        let file = handle
            .open_with(
                &file_name,
                OpenOptions::new().create(true).write(true).truncate(false),
            )
            .map_err(|err| PoolLockError::io("open lock file", &path, &err))?
            .into_std();

        tracing::debug!(path = %path, "waiting for pool lock file");
        flock(&file, Flock::Exclusive).map_err(|err| PoolLockError::io("lock", &path, &err))?;
        Ok(Self { file, path })
    }
}

impl Drop for PoolFileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        if let Err(err) = flock(&self.file, Flock::Unlock) {
            tracing::warn!(path = %self.path, error = %err, "failed to unlock pool lock file");
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Flock {
    Exclusive,
    Unlock,
}

#[cfg(unix)]
fn flock(file: &File, operation: Flock) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match operation {
        Flock::Exclusive => libc::LOCK_EX,
        Flock::Unlock => libc::LOCK_UN,
    };
    loop {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), op) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _operation: Flock) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pool lock files require a unix host",
    ))
}

/// Maps a pool name onto a file name, escaping everything outside
/// `[A-Za-z0-9._-]` as `%XX` so distinct pools never share a file.
fn lock_file_name(pool: &str) -> String {
    let mut name = String::with_capacity(pool.len() + 5);
    for byte in pool.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            name.push(char::from(byte));
        } else {
            write!(name, "%{byte:02X}").ok();
        }
    }
    name.push_str(".lock");
    name
}
