use crate::base_uri::inject_base_uri;
use crate::error::{Result, StoreError};
use crate::freshness::is_fresh;
use crate::inventory::{Inventory, InventoryAction};
use crate::key::{cache_file_name, hash_name, DocumentKind, ResourceKey};
use crate::lock::{EntryLock, ReadLock};
use crate::purge::{self, CacheInfo, PurgePolicy, PurgeReport};
use crate::response::{
    DatasetBuilder, DatasetForm, DatasetResponse, ResponseContext, ResponseWriter,
};
use crate::util::{atomic_write_with, remove_file_best_effort};
use granule_config::MetadataStoreConfig;
use granule_core::Container;
use granule_dap::Dataset;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

static INSTANCE: Mutex<Option<Arc<MetadataStore>>> = Mutex::new(None);

/// A disk-backed cache of generated metadata documents.
///
/// Each document lives in its own file, `<dir>/<prefix><sha256(name + suffix)>`,
/// whose mtime records when it was generated. Entries are read under shared
/// locks and replaced under exclusive ones, so the directory can be shared by
/// many threads and processes.
///
/// Construct one with [`MetadataStore::open`] and pass it around, or use the
/// process-wide instance from [`MetadataStore::get_instance`].
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    prefix: String,
    max_entries: u64,
    purge_fraction: f64,
    tolerance: Duration,
    inventory: Option<Inventory>,
}

impl MetadataStore {
    /// Open (and if needed create) the store described by `config`.
    ///
    /// The default directory is never created; it must already exist.
    pub fn open(config: &MetadataStoreConfig) -> Result<Self> {
        let dir = config.resolved_path();
        config
            .validate()
            .map_err(|err| StoreError::Configuration {
                path: dir.clone(),
                message: err.to_string(),
            })?;
        prepare_directory(&dir, &config.prefix, config.uses_default_dir())?;

        tracing::debug!(
            target = "granule.mds",
            dir = %dir.display(),
            prefix = %config.prefix,
            max_entries = config.max_entries,
            "opened metadata store"
        );

        Ok(Self {
            dir,
            prefix: config.prefix.clone(),
            max_entries: config.max_entries,
            purge_fraction: config.purge_fraction,
            tolerance: config.freshness_tolerance(),
            inventory: config.inventory.as_ref().map(Inventory::new),
        })
    }

    /// The process-wide store, created on the first call.
    ///
    /// Later calls return the existing instance even when their arguments
    /// differ; a warning is logged in that case.
    pub fn get_instance(
        dir: impl Into<PathBuf>,
        prefix: &str,
        max_entries: u64,
    ) -> Result<Arc<Self>> {
        let config = MetadataStoreConfig {
            path: Some(dir.into()),
            prefix: prefix.to_owned(),
            max_entries,
            ..MetadataStoreConfig::default()
        };
        Self::get_instance_with_config(&config)
    }

    pub fn get_instance_with_config(config: &MetadataStoreConfig) -> Result<Arc<Self>> {
        let mut slot = INSTANCE.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = slot.as_ref() {
            if !existing.was_opened_with(config) {
                tracing::warn!(
                    target = "granule.mds",
                    dir = %existing.dir.display(),
                    requested_dir = %config.resolved_path().display(),
                    prefix = %existing.prefix,
                    requested_prefix = %config.prefix,
                    max_entries = existing.max_entries,
                    requested_max_entries = config.max_entries,
                    "metadata store already exists; ignoring new parameters"
                );
            }
            return Ok(Arc::clone(existing));
        }

        let store = Arc::new(Self::open(config)?);
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    /// The process-wide store, if one has been created.
    pub fn instance() -> Option<Arc<Self>> {
        INSTANCE
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Forget the process-wide store. Handles already given out stay usable.
    pub fn delete_instance() {
        INSTANCE.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    fn was_opened_with(&self, config: &MetadataStoreConfig) -> bool {
        self.dir == config.resolved_path()
            && self.prefix == config.prefix
            && self.max_entries == config.max_entries
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// True when the store never purges.
    pub fn is_unlimited(&self) -> bool {
        self.max_entries == 0
    }

    pub fn hash(&self, name: &str) -> Result<String> {
        hash_name(name)
    }

    /// `<dir>/<prefix><hash>`, mangled for file-name safety when asked.
    pub fn cache_file_path(&self, hash: &str, mangle: bool) -> Result<PathBuf> {
        Ok(self.dir.join(cache_file_name(&self.prefix, hash, mangle)?))
    }

    /// Where the `kind` document for `relative_name` is stored.
    pub fn entry_path(&self, relative_name: &str, kind: DocumentKind) -> Result<PathBuf> {
        let key = ResourceKey::new(relative_name, kind)?;
        self.cache_file_path(key.hash(), false)
    }

    /// Check for a fresh `kind` entry for the dataset and read-lock it.
    ///
    /// The returned token is available iff the entry exists, its source
    /// (`real_name`) has not been modified since it was written, and a shared
    /// lock is now held. A stale entry is left in place for the next writer.
    pub fn is_available(
        &self,
        real_name: &Path,
        relative_name: &str,
        container_kind: &str,
        kind: DocumentKind,
    ) -> Result<ReadLock> {
        let path = self.entry_path(relative_name, kind)?;
        if !self.entry_is_fresh(&path, real_name)? {
            tracing::debug!(
                target = "granule.mds",
                name = relative_name,
                container_kind,
                %kind,
                "metadata store miss"
            );
            return Ok(ReadLock::unavailable(path));
        }

        let lock = EntryLock::shared(&path)?;
        // A writer or `remove` may have run while we waited for the lock.
        if !self.entry_is_fresh(&path, real_name)? {
            return Ok(ReadLock::unavailable(path));
        }

        tracing::debug!(
            target = "granule.mds",
            name = relative_name,
            container_kind,
            %kind,
            "metadata store hit"
        );
        Ok(ReadLock::held(path, lock))
    }

    /// A missing or empty entry is never fresh.
    fn entry_is_fresh(&self, entry: &Path, source: &Path) -> Result<bool> {
        let meta = match std::fs::metadata(entry) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if meta.len() == 0 {
            return Ok(false);
        }
        is_fresh(meta.modified()?, source, self.tolerance)
    }

    pub fn is_available_for(&self, container: &dyn Container, kind: DocumentKind) -> Result<ReadLock> {
        self.is_available(
            container.real_name(),
            container.relative_name(),
            container.container_kind(),
            kind,
        )
    }

    pub fn is_schema_available(&self, container: &dyn Container) -> Result<ReadLock> {
        self.is_available_for(container, DocumentKind::Schema)
    }

    pub fn is_attributes_available(&self, container: &dyn Container) -> Result<ReadLock> {
        self.is_available_for(container, DocumentKind::Attributes)
    }

    pub fn is_metadata_available(&self, container: &dyn Container) -> Result<ReadLock> {
        self.is_available_for(container, DocumentKind::Metadata)
    }

    pub fn is_chunk_index_available(&self, container: &dyn Container) -> Result<ReadLock> {
        self.is_available_for(container, DocumentKind::ChunkIndex)
    }

    /// When the `kind` entry for `relative_name` was last written.
    pub fn cache_lmt(&self, relative_name: &str, kind: DocumentKind) -> Result<SystemTime> {
        let path = self.entry_path(relative_name, kind)?;
        granule_core::modified_time(&path)?.ok_or(StoreError::EntryNotFound { path })
    }

    /// Write the entry `<prefix><hash>` from `writer` and replace any previous
    /// version atomically.
    ///
    /// Returns `false`, leaving the old entry alone, when the writer produced
    /// no bytes. A successful store refreshes the bookkeeping and may purge
    /// other entries.
    pub fn store_response<W: ResponseWriter + ?Sized>(
        &self,
        writer: &W,
        hash: &str,
        dataset_name: &str,
        kind: DocumentKind,
    ) -> Result<bool> {
        let path = self.cache_file_path(hash, false)?;
        let stored = {
            let _lock = EntryLock::exclusive(&path)?;
            write_entry(&path, writer)?
        };
        self.finish_store(&path, stored, dataset_name, kind)
    }

    /// Log the outcome of a write and, if something was stored, refresh the
    /// bookkeeping. Called after the entry lock is released.
    fn finish_store(
        &self,
        path: &Path,
        stored: bool,
        dataset_name: &str,
        kind: DocumentKind,
    ) -> Result<bool> {
        if !stored {
            tracing::debug!(
                target = "granule.mds",
                name = dataset_name,
                %kind,
                "response writer produced no output; nothing stored"
            );
            return Ok(false);
        }

        tracing::debug!(
            target = "granule.mds",
            name = dataset_name,
            %kind,
            path = %path.display(),
            "stored metadata response"
        );
        let entry_name = path.file_name().and_then(|n| n.to_str());
        self.update_and_purge(entry_name)?;
        Ok(true)
    }

    /// Store every document `form` calls for under `name`.
    ///
    /// Returns true iff all of them were stored; only then is the dataset
    /// recorded in the inventory.
    pub fn add_responses(&self, form: DatasetForm<'_>, name: &str) -> Result<bool> {
        let dataset = form.dataset();
        let mut hashes = Vec::with_capacity(form.kinds().len());
        let mut all_stored = true;
        for &kind in form.kinds() {
            let key = ResourceKey::new(name, kind)?;
            let response = DatasetResponse::new(dataset, kind);
            all_stored &= self.store_response(&response, key.hash(), name, kind)?;
            hashes.push(key.hash().to_owned());
        }

        if all_stored {
            if let Some(inventory) = &self.inventory {
                inventory.record(InventoryAction::Add, name, &hashes);
            }
        }
        Ok(all_stored)
    }

    /// Delete every entry stored for `name`.
    ///
    /// Missing entries count as removed. Returns false if any file could not
    /// be deleted.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut removed_all = true;
        let mut hashes = Vec::with_capacity(DocumentKind::ALL.len());
        for kind in DocumentKind::ALL {
            let key = ResourceKey::new(name, kind)?;
            let path = self.cache_file_path(key.hash(), false)?;

            let lock = EntryLock::exclusive(&path)?;
            removed_all &= remove_file_best_effort(&path, "remove");
            remove_file_best_effort(lock.path(), "remove.sidecar");
            drop(lock);

            hashes.push(key.hash().to_owned());
        }

        tracing::debug!(
            target = "granule.mds",
            name,
            removed_all,
            "removed metadata responses"
        );
        if let Some(inventory) = &self.inventory {
            inventory.record(InventoryAction::Remove, name, &hashes);
        }
        Ok(removed_all)
    }

    /// Send the `kind` document for `container` to `sink`, generating and
    /// caching it first when there is no fresh entry.
    ///
    /// Chunk-index documents require `context.base_uri`; it is stamped onto
    /// the root element as `xml:base` while streaming.
    pub fn write_response<B, W>(
        &self,
        kind: DocumentKind,
        container: &dyn Container,
        builder: &B,
        sink: &mut W,
        context: &ResponseContext,
    ) -> Result<()>
    where
        B: DatasetBuilder + ?Sized,
        W: Write + ?Sized,
    {
        let base_uri = context.base_uri_for(kind)?;
        let relative_name = container.relative_name();

        let token = self.is_available_for(container, kind)?;
        if token.is_available() {
            return emit(&token, sink, base_uri);
        }
        let path = token.path().to_path_buf();
        drop(token);

        let stored = {
            let _lock = EntryLock::exclusive(&path)?;
            // Another caller may have generated the entry while we waited.
            if self.entry_is_fresh(&path, container.real_name())? {
                None
            } else {
                let dataset = builder.build_dataset(container)?;
                Some(write_entry(&path, &DatasetResponse::new(&dataset, kind))?)
            }
        };

        if let Some(stored) = stored {
            if !self.finish_store(&path, stored, relative_name, kind)? {
                return Err(StoreError::EmptyResponse {
                    name: relative_name.to_owned(),
                    kind,
                });
            }
        }

        let lock = EntryLock::shared(&path)?;
        emit(&ReadLock::held(path, lock), sink, base_uri)
    }

    /// Read the cached metadata document for `name` back into a [`Dataset`].
    pub fn get_structured_object(&self, name: &str) -> Result<Dataset> {
        self.read_dataset(name, DocumentKind::Metadata)
    }

    /// Read the cached chunk-index document for `name`, chunk layouts included.
    pub fn get_chunked_object(&self, name: &str) -> Result<Dataset> {
        self.read_dataset(name, DocumentKind::ChunkIndex)
    }

    fn read_dataset(&self, name: &str, kind: DocumentKind) -> Result<Dataset> {
        let path = self.entry_path(name, kind)?;
        if granule_core::modified_time(&path)?.is_none() {
            return Err(StoreError::EntryNotFound { path });
        }
        let lock = EntryLock::shared(&path)?;
        let text = ReadLock::held(path, lock).read_to_string()?;
        Ok(granule_dap::parse_metadata(&text)?)
    }

    fn purge_policy(&self) -> PurgePolicy {
        PurgePolicy {
            max_entries: self.max_entries,
            purge_fraction: self.purge_fraction,
        }
    }

    /// Refresh the bookkeeping file and purge if the store is over its limit.
    ///
    /// `protected` names an entry file (`<prefix><hash>`) that must survive,
    /// usually the one just written.
    pub fn update_and_purge(&self, protected: Option<&str>) -> Result<PurgeReport> {
        purge::update_and_purge(&self.dir, &self.prefix, self.purge_policy(), protected)
    }

    pub fn cache_info(&self) -> Result<Option<CacheInfo>> {
        purge::read_cache_info(&self.dir, &self.prefix)
    }
}

/// Replace `path` with the writer's output. The caller holds the entry's
/// exclusive lock. Returns false, leaving the old entry alone, when nothing
/// was written.
fn write_entry<W: ResponseWriter + ?Sized>(path: &Path, writer: &W) -> Result<bool> {
    atomic_write_with(path, |file| {
        let mut out = BufWriter::new(&mut *file);
        writer.write_to(&mut out)?;
        out.into_inner().map_err(|err| err.into_error())?;
        Ok(file.metadata()?.len() > 0)
    })
}

fn emit<W: Write + ?Sized>(token: &ReadLock, sink: &mut W, base_uri: Option<&str>) -> Result<()> {
    match base_uri {
        Some(uri) => inject_base_uri(&mut token.open()?, sink, uri),
        None => {
            token.copy_to(sink)?;
            sink.flush()?;
            Ok(())
        }
    }
}

fn prepare_directory(dir: &Path, prefix: &str, is_default: bool) -> Result<()> {
    let unusable = |message: String| StoreError::Configuration {
        path: dir.to_path_buf(),
        message,
    };

    if is_default {
        if !dir.is_dir() {
            return Err(unusable("default directory does not exist".to_owned()));
        }
    } else {
        std::fs::create_dir_all(dir)
            .map_err(|err| unusable(format!("cannot create directory: {err}")))?;
    }

    // Create and discard a temp file to prove the directory is writable.
    atomic_write_with(&dir.join(format!("{prefix}probe")), |file| {
        file.write_all(b"probe")?;
        Ok(false)
    })
    .map_err(|err| unusable(format!("directory is not writable: {err}")))?;
    Ok(())
}
