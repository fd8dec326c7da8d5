//! The metadata store: a disk cache of generated metadata documents.
//!
//! Building a dataset's schema means walking the internals of its data file,
//! which is slow. The store keeps each generated document in its own file and
//! serves it again until the data file changes.
//!
//! ## On-disk layout
//!
//! Everything lives directly in the configured directory:
//! - `<prefix><sha256>`: one document. The hash covers the dataset's logical
//!   name plus a per-kind suffix (see [`DocumentKind::suffix`]). The file's
//!   mtime is the generation time checked against the data file.
//! - `<prefix><sha256>.lock`: sidecar used for shared/exclusive `fs2` locks on
//!   the entry next to it.
//! - `<prefix><sha256>.tmp.<pid>.<n>`: in-flight writes, renamed over the entry
//!   when complete.
//! - `<prefix>cache_info.json` + `<prefix>cache.lock`: entry count and size
//!   ([`CacheInfo`]), rewritten after every store and purge.
//!
//! An optional inventory file (see [`Inventory`]) records datasets as they are
//! added and removed.

mod base_uri;
mod error;
mod freshness;
mod inventory;
mod key;
mod lock;
mod purge;
mod response;
mod store;
mod util;

pub use base_uri::{inject_base_uri, CHUNK_SIZE};
pub use error::{ErrorCategory, Result, StoreError};
pub use inventory::{Inventory, InventoryAction};
pub use key::{cache_file_name, hash_name, DocumentKind, ResourceKey, MAX_FILE_NAME_LEN};
pub use lock::{EntryLock, ReadLock};
pub use purge::{CacheInfo, PurgeFailure, PurgeReport};
pub use response::{DatasetBuilder, DatasetForm, DatasetResponse, ResponseContext, ResponseWriter};
pub use store::MetadataStore;
pub use util::now_millis;

pub use granule_config::MetadataStoreConfig;
