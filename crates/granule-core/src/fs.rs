use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Modification time of `path`, or `None` when it does not exist.
///
/// Symlinks are followed: a data file published through a link is as fresh as
/// its target.
pub fn modified_time(path: &Path) -> io::Result<Option<SystemTime>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    Ok(Some(metadata.modified()?))
}
