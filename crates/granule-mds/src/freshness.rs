use crate::error::Result;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Whether an entry written at `entry_mtime` still describes `source`.
///
/// The entry is stale only when the source was modified more than `tolerance`
/// after it. A source that cannot be found leaves the entry valid: not every
/// dataset name maps to a local file.
pub(crate) fn is_fresh(entry_mtime: SystemTime, source: &Path, tolerance: Duration) -> Result<bool> {
    let Some(source_mtime) = granule_core::modified_time(source)? else {
        return Ok(true);
    };
    let horizon = entry_mtime.checked_add(tolerance).unwrap_or(entry_mtime);
    Ok(source_mtime <= horizon)
}
