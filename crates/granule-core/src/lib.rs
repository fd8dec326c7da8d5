//! Core shared types for Granule.
//!
//! This crate is intentionally small. It holds the vocabulary shared between the
//! request-dispatch layer and the metadata store: the [`Container`] abstraction
//! describing the dataset being served, and a few filesystem helpers.

mod fs;

pub use fs::modified_time;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The Granule version, recorded in persisted bookkeeping files.
pub const GRANULE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A reference to the dataset a request is about.
///
/// The dispatch layer hands one of these to the format handlers. The metadata
/// store only ever reads from it.
pub trait Container {
    /// Path of the underlying data file on the local filesystem.
    fn real_name(&self) -> &Path;

    /// Logical name of the dataset, used to derive cache keys.
    fn relative_name(&self) -> &str;

    /// Which format handler serves this container (`h5`, `nc`, ...).
    fn container_kind(&self) -> &str;
}

/// A [`Container`] backed by a plain file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileContainer {
    real_name: PathBuf,
    relative_name: String,
    container_kind: String,
}

impl FileContainer {
    pub fn new(
        real_name: impl Into<PathBuf>,
        relative_name: impl Into<String>,
        container_kind: impl Into<String>,
    ) -> Self {
        Self {
            real_name: real_name.into(),
            relative_name: relative_name.into(),
            container_kind: container_kind.into(),
        }
    }
}

impl Container for FileContainer {
    fn real_name(&self) -> &Path {
        &self.real_name
    }

    fn relative_name(&self) -> &str {
        &self.relative_name
    }

    fn container_kind(&self) -> &str {
        &self.container_kind
    }
}

impl<C: Container + ?Sized> Container for &C {
    fn real_name(&self) -> &Path {
        (**self).real_name()
    }

    fn relative_name(&self) -> &str {
        (**self).relative_name()
    }

    fn container_kind(&self) -> &str {
        (**self).container_kind()
    }
}
