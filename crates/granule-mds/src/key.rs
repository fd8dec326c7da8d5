use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest file name the store will generate.
pub const MAX_FILE_NAME_LEN: usize = 254;

/// Characters replaced by `#` when a cache file name is mangled.
const CHARS_EXCLUDED_FROM_FILE_NAMES: &str = "<>=,/()\\\"':? []$";

/// The kinds of metadata document the store keeps for a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    /// DAP2 structure listing.
    Schema,
    /// DAP2 attribute listing.
    Attributes,
    /// DAP4 XML description.
    Metadata,
    /// DAP4 description annotated with chunk locations.
    ChunkIndex,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Schema,
        DocumentKind::Attributes,
        DocumentKind::Metadata,
        DocumentKind::ChunkIndex,
    ];

    /// Appended to the dataset name before hashing, so each kind lands in its own file.
    pub fn suffix(self) -> &'static str {
        match self {
            DocumentKind::Schema => "dds_r",
            DocumentKind::Attributes => "das_r",
            DocumentKind::Metadata => "dmr_r",
            DocumentKind::ChunkIndex => "dmrpp_r",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentKind::Schema => "DDS",
            DocumentKind::Attributes => "DAS",
            DocumentKind::Metadata => "DMR",
            DocumentKind::ChunkIndex => "DMR++",
        }
    }

    /// Responses of this kind point back at the data through an `xml:base` attribute.
    pub fn requires_base_uri(self) -> bool {
        matches!(self, DocumentKind::ChunkIndex)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// SHA-256 of `name` as lowercase hex.
///
/// A single leading `/` is ignored so `/data/a.h5` and `data/a.h5` share
/// entries. Empty names are rejected.
pub fn hash_name(name: &str) -> Result<String> {
    Ok(digest(normalize_name(name)?))
}

/// Strip a single leading `/`; what remains must not be empty.
fn normalize_name(name: &str) -> Result<&str> {
    let normalized = name.strip_prefix('/').unwrap_or(name);
    if normalized.is_empty() {
        return Err(StoreError::EmptyName);
    }
    Ok(normalized)
}

fn digest(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identifies one cached document: a dataset's logical name plus a document kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    relative_name: String,
    kind: DocumentKind,
    hash: String,
}

impl ResourceKey {
    pub fn new(relative_name: &str, kind: DocumentKind) -> Result<Self> {
        let relative_name = normalize_name(relative_name)?;
        let hash = digest(&format!("{relative_name}{}", kind.suffix()));
        Ok(Self {
            relative_name: relative_name.to_owned(),
            kind,
            hash,
        })
    }

    pub fn relative_name(&self) -> &str {
        &self.relative_name
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Build the file name `<prefix><src>`, optionally replacing characters that are
/// unsafe in file names.
pub fn cache_file_name(prefix: &str, src: &str, mangle: bool) -> Result<String> {
    let mut target = format!("{prefix}{src}");
    if mangle {
        target = target
            .chars()
            .map(|c| {
                if CHARS_EXCLUDED_FROM_FILE_NAMES.contains(c) {
                    '#'
                } else {
                    c
                }
            })
            .collect();
    }

    if target.len() > MAX_FILE_NAME_LEN {
        return Err(StoreError::NameTooLong {
            len: target.len(),
            name: target,
        });
    }
    Ok(target)
}

/// Whether `file_name` is a hash-addressed entry written under `prefix`.
pub(crate) fn is_hashed_entry_name(prefix: &str, file_name: &str) -> bool {
    file_name.strip_prefix(prefix).is_some_and(|rest| {
        rest.len() == 64 && rest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}
