use crate::error::{Result, StoreError};
use crate::key::is_hashed_entry_name;
use crate::lock::{sidecar_path, EntryLock};
use crate::util::{atomic_write_with, now_millis, remove_file_best_effort};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bookkeeping written next to the entries after every store and purge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Number of entries in the directory.
    pub entries: u64,
    /// Total size of those entries.
    pub bytes: u64,
    /// File name of the entry that triggered the last update, if any.
    pub last_entry: Option<String>,
    pub updated_at_millis: u64,
    /// Granule version that wrote this file.
    pub version: String,
}

/// Result summary from a purge run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub before_entries: u64,
    pub after_entries: u64,
    pub before_bytes: u64,
    pub after_bytes: u64,
    /// File names of deleted entries, oldest first.
    pub deleted: Vec<String>,
    /// Entries left alone because another caller held their lock.
    pub skipped_locked: usize,
    pub failed: Vec<PurgeFailure>,
}

impl PurgeReport {
    pub fn deleted_entries(&self) -> usize {
        self.deleted.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PurgeFailure {
    pub entry: String,
    pub error: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PurgePolicy {
    /// `0` means unlimited.
    pub max_entries: u64,
    pub purge_fraction: f64,
}

impl PurgePolicy {
    /// Entry count a purge reduces the directory to.
    pub fn target(&self) -> u64 {
        (self.max_entries as f64 * self.purge_fraction).floor() as u64
    }
}

#[derive(Clone, Debug)]
struct EntryInfo {
    name: String,
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

pub(crate) fn cache_info_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}cache_info.json"))
}

/// Entry whose sidecar serialises bookkeeping updates (`<prefix>cache.lock`).
fn directory_lock_entry(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}cache"))
}

fn scan_entries(dir: &Path, prefix: &str) -> Result<Vec<EntryInfo>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(
                    target = "granule.mds",
                    dir = %dir.display(),
                    error = %err,
                    "failed to read metadata store directory entry"
                );
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_hashed_entry_name(prefix, &name) {
            continue;
        }

        // Entries can race with deletion; anything we cannot stat is skipped.
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "granule.mds",
                        path = %entry.path().display(),
                        error = %err,
                        "failed to stat metadata store entry"
                    );
                }
                continue;
            }
        };
        entries.push(EntryInfo {
            name,
            path: entry.path(),
            len: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
        });
    }
    Ok(entries)
}

/// Refresh the bookkeeping file and, when the directory holds more than
/// `policy.max_entries` entries, delete the oldest until `policy.target()`
/// remain.
///
/// `protected` (an entry file name) and entries locked by other callers are
/// never deleted, so the result may stay above the target.
pub(crate) fn update_and_purge(
    dir: &Path,
    prefix: &str,
    policy: PurgePolicy,
    protected: Option<&str>,
) -> Result<PurgeReport> {
    let _dir_lock = EntryLock::exclusive(&directory_lock_entry(dir, prefix))?;

    let mut entries = scan_entries(dir, prefix)?;
    let mut report = PurgeReport {
        before_entries: entries.len() as u64,
        before_bytes: entries.iter().map(|e| e.len).sum(),
        ..PurgeReport::default()
    };
    let mut remaining = report.before_entries;
    let mut remaining_bytes = report.before_bytes;

    if policy.max_entries != 0 && remaining > policy.max_entries {
        let target = policy.target();
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));

        for entry in &entries {
            if remaining <= target {
                break;
            }
            if protected == Some(entry.name.as_str()) {
                continue;
            }

            let Some(lock) = EntryLock::try_exclusive(&entry.path)? else {
                report.skipped_locked += 1;
                continue;
            };
            match std::fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    report.failed.push(PurgeFailure {
                        entry: entry.name.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            }
            remove_file_best_effort(&sidecar_path(&entry.path), "purge.sidecar");
            drop(lock);

            remaining -= 1;
            remaining_bytes = remaining_bytes.saturating_sub(entry.len);
            report.deleted.push(entry.name.clone());
        }

        tracing::debug!(
            target = "granule.mds",
            dir = %dir.display(),
            before = report.before_entries,
            after = remaining,
            deleted = report.deleted.len(),
            skipped_locked = report.skipped_locked,
            failed = report.failed.len(),
            "purged metadata store"
        );
    }

    report.after_entries = remaining;
    report.after_bytes = remaining_bytes;

    let info = CacheInfo {
        entries: remaining,
        bytes: remaining_bytes,
        last_entry: protected.map(str::to_owned),
        updated_at_millis: now_millis(),
        version: granule_core::GRANULE_VERSION.to_owned(),
    };
    write_cache_info(dir, prefix, &info)?;

    Ok(report)
}

fn write_cache_info(dir: &Path, prefix: &str, info: &CacheInfo) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(info)?;
    atomic_write_with(&cache_info_path(dir, prefix), |file| {
        file.write_all(&bytes)?;
        Ok(true)
    })?;
    Ok(())
}

/// Read the bookkeeping file, or `None` before the first update.
pub(crate) fn read_cache_info(dir: &Path, prefix: &str) -> Result<Option<CacheInfo>> {
    let path = cache_info_path(dir, prefix);
    let _dir_lock = EntryLock::shared(&directory_lock_entry(dir, prefix))?;
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::Io(err)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}
