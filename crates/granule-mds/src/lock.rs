use crate::error::{Result, StoreError};
use fs2::FileExt as _;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};

pub(crate) const LOCK_SUFFIX: &str = ".lock";

/// Sidecar lock file guarding `entry`.
pub(crate) fn sidecar_path(entry: &Path) -> PathBuf {
    let mut name = entry
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(LOCK_SUFFIX);
    entry.with_file_name(name)
}

/// How many holders each sidecar has inside this process.
#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

impl Holders {
    fn admits(&self, exclusive: bool) -> bool {
        if exclusive {
            self.readers == 0 && !self.writer
        } else {
            !self.writer
        }
    }

    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer
    }
}

/// Process-local reader/writer state per sidecar path. A path is only in the
/// map while somebody holds or waits for it.
#[derive(Debug, Default)]
struct ProcessLocks {
    held: Mutex<HashMap<PathBuf, Holders>>,
    released: Condvar,
}

impl ProcessLocks {
    fn get() -> &'static ProcessLocks {
        static PROCESS_LOCKS: OnceLock<ProcessLocks> = OnceLock::new();
        PROCESS_LOCKS.get_or_init(ProcessLocks::default)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, Holders>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(&self, path: &Path, exclusive: bool) -> ProcessHold {
        let mut held = self.table();
        loop {
            let holders = held.entry(path.to_path_buf()).or_default();
            if holders.admits(exclusive) {
                return Self::take(holders, path, exclusive);
            }
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn try_acquire_exclusive(&self, path: &Path) -> Option<ProcessHold> {
        let mut held = self.table();
        let holders = held.entry(path.to_path_buf()).or_default();
        holders
            .admits(true)
            .then(|| Self::take(holders, path, true))
    }

    fn take(holders: &mut Holders, path: &Path, exclusive: bool) -> ProcessHold {
        if exclusive {
            holders.writer = true;
        } else {
            holders.readers += 1;
        }
        ProcessHold {
            path: path.to_path_buf(),
            exclusive,
        }
    }

    fn release(&self, path: &Path, exclusive: bool) {
        let mut held = self.table();
        if let Some(holders) = held.get_mut(path) {
            if exclusive {
                holders.writer = false;
            } else {
                holders.readers = holders.readers.saturating_sub(1);
            }
            if holders.is_idle() {
                held.remove(path);
            }
        }
        drop(held);
        self.released.notify_all();
    }

    #[cfg(test)]
    fn tracked(&self, path: &Path) -> bool {
        self.table().contains_key(path)
    }
}

/// This process's share of a sidecar, released on drop.
#[derive(Debug)]
struct ProcessHold {
    path: PathBuf,
    exclusive: bool,
}

impl Drop for ProcessHold {
    fn drop(&mut self) {
        ProcessLocks::get().release(&self.path, self.exclusive);
    }
}

/// An advisory lock on one cache entry, held through the entry's sidecar file.
///
/// Safe across processes sharing the cache directory. The lock is released
/// when the value is dropped.
pub struct EntryLock {
    file: File,
    path: PathBuf,
    // `fs2` locks do not exclude other threads of the same process on every
    // platform, so a process-local reader/writer hold backs the file lock.
    // Declared after `file` so the file lock is released first.
    hold: ProcessHold,
}

impl std::fmt::Debug for EntryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryLock")
            .field("path", &self.path)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

impl EntryLock {
    /// Block until a shared (reader) lock on `entry` is held.
    pub fn shared(entry: &Path) -> Result<Self> {
        let lock_path = sidecar_path(entry);
        loop {
            let hold = ProcessLocks::get().acquire(&lock_path, false);
            let file = open_sidecar(&lock_path)?;
            file.lock_shared().map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;
            if let Some(lock) = Self::confirm(file, &lock_path, hold)? {
                return Ok(lock);
            }
        }
    }

    /// Block until an exclusive (writer) lock on `entry` is held.
    pub fn exclusive(entry: &Path) -> Result<Self> {
        let lock_path = sidecar_path(entry);
        loop {
            let hold = ProcessLocks::get().acquire(&lock_path, true);
            let file = open_sidecar(&lock_path)?;
            file.lock_exclusive().map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;
            if let Some(lock) = Self::confirm(file, &lock_path, hold)? {
                return Ok(lock);
            }
        }
    }

    /// Take an exclusive lock on `entry` only if nobody else holds one.
    pub fn try_exclusive(entry: &Path) -> Result<Option<Self>> {
        let lock_path = sidecar_path(entry);
        let Some(hold) = ProcessLocks::get().try_acquire_exclusive(&lock_path) else {
            return Ok(None);
        };

        let file = open_sidecar(&lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if is_contended(&err) => return Ok(None),
            Err(source) => {
                return Err(StoreError::Lock {
                    path: lock_path,
                    source,
                })
            }
        }
        Self::confirm(file, &lock_path, hold)
    }

    pub fn is_exclusive(&self) -> bool {
        self.hold.exclusive
    }

    /// The sidecar file this lock is held on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that the locked handle is still the file named by `lock_path`.
    ///
    /// `remove` unlinks sidecars while holding them exclusively; a waiter that
    /// wins the lock afterwards holds an orphaned inode and must start over.
    fn confirm(file: File, lock_path: &Path, hold: ProcessHold) -> Result<Option<Self>> {
        if !same_file(&file, lock_path)? {
            let _ = file.unlock();
            tracing::debug!(
                target = "granule.mds",
                path = %lock_path.display(),
                "lock file replaced while waiting; retrying"
            );
            return Ok(None);
        }
        Ok(Some(Self {
            file,
            path: lock_path.to_path_buf(),
            hold,
        }))
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_sidecar(lock_path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .map_err(|source| StoreError::Lock {
            path: lock_path.to_path_buf(),
            source,
        })
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt as _;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> Result<bool> {
    // Open files cannot be unlinked on Windows, so the path can only have
    // disappeared, not been replaced.
    Ok(path.exists())
}

/// Result of an availability check.
///
/// Available iff the entry exists, is at least as new as its source, and a
/// shared lock on it is held. The lock lives as long as this value, so read
/// through it and drop it before regenerating the entry.
#[derive(Debug)]
pub struct ReadLock {
    entry: PathBuf,
    lock: Option<EntryLock>,
}

impl ReadLock {
    pub(crate) fn unavailable(entry: PathBuf) -> Self {
        Self { entry, lock: None }
    }

    pub(crate) fn held(entry: PathBuf, lock: EntryLock) -> Self {
        Self {
            entry,
            lock: Some(lock),
        }
    }

    pub fn is_available(&self) -> bool {
        self.lock.is_some()
    }

    /// Path of the cache entry this token refers to.
    pub fn path(&self) -> &Path {
        &self.entry
    }

    /// Stream the entry's bytes into `sink`, returning how many were copied.
    pub fn copy_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64> {
        let mut file = self.open()?;
        Ok(io::copy(&mut file, sink)?)
    }

    pub fn read_to_string(&self) -> Result<String> {
        let mut text = String::new();
        self.open()?.read_to_string(&mut text)?;
        Ok(text)
    }

    pub(crate) fn open(&self) -> Result<File> {
        if !self.is_available() {
            return Err(StoreError::EntryNotFound {
                path: self.entry.clone(),
            });
        }
        File::open(&self.entry).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StoreError::EntryNotFound {
                path: self.entry.clone(),
            },
            _ => StoreError::Io(err),
        })
    }
}

impl From<&ReadLock> for bool {
    fn from(lock: &ReadLock) -> bool {
        lock.is_available()
    }
}
