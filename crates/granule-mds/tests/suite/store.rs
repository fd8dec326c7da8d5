use super::{open_store, sample_dataset, PREFIX};
use granule_core::FileContainer;
use granule_dap::Dataset;
use granule_mds::{
    hash_name, DatasetForm, DocumentKind, ResourceKey, ResponseContext, StoreError,
};
use std::io::Write;
use tempfile::tempdir;

#[test]
fn store_response_writes_the_hashed_entry() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let key = ResourceKey::new("data/a.h5", DocumentKind::Schema).unwrap();

    let writer = |out: &mut dyn Write| -> granule_mds::Result<()> {
        out.write_all(b"Dataset {\n} a;\n")?;
        Ok(())
    };
    assert!(store
        .store_response(&writer, key.hash(), "data/a.h5", DocumentKind::Schema)
        .unwrap());

    let path = cache.path().join(format!("{PREFIX}{}", key.hash()));
    assert_eq!(std::fs::read(&path).unwrap(), b"Dataset {\n} a;\n");
}

#[test]
fn empty_writer_output_stores_nothing() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let hash = hash_name("data/a.h5dds_r").unwrap();
    let path = store.cache_file_path(&hash, false).unwrap();

    let nothing = |_: &mut dyn Write| -> granule_mds::Result<()> { Ok(()) };
    assert!(!store
        .store_response(&nothing, &hash, "data/a.h5", DocumentKind::Schema)
        .unwrap());
    assert!(!path.exists());

    // A previous entry survives an empty regeneration.
    std::fs::write(&path, b"old").unwrap();
    assert!(!store
        .store_response(&nothing, &hash, "data/a.h5", DocumentKind::Schema)
        .unwrap());
    assert_eq!(std::fs::read(&path).unwrap(), b"old");
}

#[test]
fn writer_errors_propagate() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let hash = hash_name("x").unwrap();

    let failing = |out: &mut dyn Write| -> granule_mds::Result<()> {
        out.write_all(b"partial")?;
        Err(StoreError::generator("handler crashed"))
    };
    let err = store
        .store_response(&failing, &hash, "x", DocumentKind::Metadata)
        .unwrap_err();
    assert!(matches!(err, StoreError::Generator { .. }));
    assert!(!store.cache_file_path(&hash, false).unwrap().exists());
}

#[test]
fn add_responses_stores_the_documents_each_form_needs() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let dataset = sample_dataset("d");

    let exists = |name: &str, kind| store.entry_path(name, kind).unwrap().exists();

    assert!(store.add_responses(DatasetForm::Classic(&dataset), "classic").unwrap());
    assert!(exists("classic", DocumentKind::Schema));
    assert!(exists("classic", DocumentKind::Attributes));
    assert!(exists("classic", DocumentKind::Metadata));
    assert!(!exists("classic", DocumentKind::ChunkIndex));

    assert!(store.add_responses(DatasetForm::Dap4(&dataset), "dap4").unwrap());
    assert!(!exists("dap4", DocumentKind::Schema));
    assert!(exists("dap4", DocumentKind::Metadata));

    assert!(store.add_responses(DatasetForm::Chunked(&dataset), "chunked").unwrap());
    assert!(exists("chunked", DocumentKind::Metadata));
    assert!(exists("chunked", DocumentKind::ChunkIndex));
    assert!(!exists("chunked", DocumentKind::Attributes));
}

#[test]
fn add_responses_records_the_inventory() {
    let cache = tempdir().unwrap();
    let mut config = super::config(cache.path());
    let ledger = cache.path().join("ledger.txt");
    config.inventory = Some(ledger.clone());
    let store = granule_mds::MetadataStore::open(&config).unwrap();

    store
        .add_responses(DatasetForm::Dap4(&sample_dataset("d")), "data/d.h5")
        .unwrap();
    store.remove("data/d.h5").unwrap();

    let text = std::fs::read_to_string(&ledger).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let dmr_hash = hash_name("data/d.h5dmr_r").unwrap();
    assert_eq!(lines[0], format!("add,data/d.h5,{dmr_hash}"));
    assert!(lines[1].starts_with("remove,data/d.h5,"));
    assert!(lines[1].contains(&dmr_hash));
}

#[test]
fn chunk_index_responses_require_a_base_uri() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let container = FileContainer::new(cache.path().join("a.h5"), "a.h5", "h5");
    let builder = |_: &dyn granule_core::Container| -> granule_mds::Result<Dataset> {
        panic!("builder must not run without a base URI")
    };

    let mut out = Vec::new();
    let err = store
        .write_response(
            DocumentKind::ChunkIndex,
            &container,
            &builder,
            &mut out,
            &ResponseContext::default(),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingContext { key: "base_uri" }));
    assert!(out.is_empty());
}

#[test]
fn write_response_generates_once_then_serves_from_cache() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let container = FileContainer::new(cache.path().join("absent.h5"), "data/a.h5", "h5");
    let calls = std::cell::Cell::new(0);
    let builder = |c: &dyn granule_core::Container| -> granule_mds::Result<Dataset> {
        calls.set(calls.get() + 1);
        Ok(sample_dataset(c.relative_name()))
    };
    let context = ResponseContext::with_base_uri("https://data.example.org/a.h5");

    let mut first = Vec::new();
    store
        .write_response(DocumentKind::ChunkIndex, &container, &builder, &mut first, &context)
        .unwrap();
    let mut second = Vec::new();
    store
        .write_response(DocumentKind::ChunkIndex, &container, &builder, &mut second, &context)
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);
    let text = String::from_utf8(first).unwrap();
    assert_eq!(text.matches("xml:base=").count(), 1);
    assert!(text.contains(r#"<Dataset xml:base="https://data.example.org/a.h5" xmlns="#));

    // The stored entry itself carries no base.
    let stored = std::fs::read_to_string(
        store.entry_path("data/a.h5", DocumentKind::ChunkIndex).unwrap(),
    )
    .unwrap();
    assert!(!stored.contains("xml:base"));
}

#[test]
fn write_response_streams_plain_documents_verbatim() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let container = FileContainer::new(cache.path().join("absent.h5"), "data/a.h5", "h5");
    let builder =
        |_: &dyn granule_core::Container| -> granule_mds::Result<Dataset> { Ok(sample_dataset("a")) };

    let mut out = Vec::new();
    store
        .write_response(
            DocumentKind::Schema,
            &container,
            &builder,
            &mut out,
            &ResponseContext::default(),
        )
        .unwrap();

    let stored = std::fs::read(store.entry_path("data/a.h5", DocumentKind::Schema).unwrap()).unwrap();
    assert_eq!(out, stored);
    assert!(String::from_utf8(out).unwrap().starts_with("Dataset {"));
}

#[test]
fn builder_errors_reach_the_caller() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let container = FileContainer::new(cache.path().join("absent.h5"), "data/a.h5", "h5");
    let builder = |_: &dyn granule_core::Container| -> granule_mds::Result<Dataset> {
        Err(StoreError::generator("unsupported format"))
    };

    let mut out = Vec::new();
    let err = store
        .write_response(
            DocumentKind::Metadata,
            &container,
            &builder,
            &mut out,
            &ResponseContext::default(),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Generator { .. }));
    assert!(out.is_empty());
}

#[test]
fn empty_entries_are_regenerated() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let container = FileContainer::new(cache.path().join("absent.h5"), "data/a.h5", "h5");
    let path = store.entry_path("data/a.h5", DocumentKind::Schema).unwrap();
    std::fs::write(&path, b"").unwrap();

    assert!(!store.is_schema_available(&container).unwrap().is_available());

    let calls = std::cell::Cell::new(0);
    let builder = |_: &dyn granule_core::Container| -> granule_mds::Result<Dataset> {
        calls.set(calls.get() + 1);
        Ok(sample_dataset("a"))
    };
    let mut out = Vec::new();
    store
        .write_response(
            DocumentKind::Schema,
            &container,
            &builder,
            &mut out,
            &ResponseContext::default(),
        )
        .unwrap();

    assert_eq!(calls.get(), 1);
    let mut expected = Vec::new();
    granule_dap::print_schema(&sample_dataset("a"), &mut expected).unwrap();
    assert_eq!(out, expected);
    assert_eq!(std::fs::read(&path).unwrap(), expected);
    assert!(store.is_schema_available(&container).unwrap().is_available());
}
