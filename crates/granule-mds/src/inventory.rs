use fs2::FileExt as _;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only record of datasets added to and removed from the store.
///
/// One line per operation: `add,<name>,<hash>,...` or `remove,<name>,<hash>,...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryAction {
    Add,
    Remove,
}

impl InventoryAction {
    fn as_str(self) -> &'static str {
        match self {
            InventoryAction::Add => "add",
            InventoryAction::Remove => "remove",
        }
    }
}

impl Inventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `action` for `name`. Failures are logged, never returned; the
    /// inventory is informational.
    pub fn record(&self, action: InventoryAction, name: &str, hashes: &[String]) {
        if let Err(err) = self.append(action, name, hashes) {
            tracing::warn!(
                target = "granule.mds",
                path = %self.path.display(),
                name,
                error = %err,
                "failed to write metadata store inventory"
            );
        }
    }

    fn append(&self, action: InventoryAction, name: &str, hashes: &[String]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut line = format!("{},{name}", action.as_str());
        for hash in hashes {
            line.push(',');
            line.push_str(hash);
        }
        line.push('\n');

        // Writers in other processes append to the same file.
        file.lock_exclusive()?;
        let result = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        let _ = file.unlock();
        result
    }
}
