use super::{open_store, sample_dataset};
use granule_dap::{DapError, DataType, Variable};
use granule_mds::{DatasetForm, DocumentKind, StoreError};
use tempfile::tempdir;

fn print(f: fn(&granule_dap::Dataset, &mut Vec<u8>) -> std::io::Result<()>, d: &granule_dap::Dataset) -> Vec<u8> {
    let mut out = Vec::new();
    f(d, &mut out).unwrap();
    out
}

#[test]
fn structured_object_reprints_identically() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let dataset = sample_dataset("test_array_4");
    store
        .add_responses(DatasetForm::Dap4(&dataset), "test_array_4.h5")
        .unwrap();

    let stored = std::fs::read(
        store
            .entry_path("test_array_4.h5", DocumentKind::Metadata)
            .unwrap(),
    )
    .unwrap();
    let parsed = store.get_structured_object("test_array_4.h5").unwrap();
    assert_eq!(print(|d, o| granule_dap::print_metadata(d, o), &parsed), stored);
    assert_eq!(parsed.name, "test_array_4");
    assert!(!parsed.has_chunk_layouts());
}

#[test]
fn chunked_object_keeps_chunk_layouts() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let dataset = sample_dataset("chunked_fourD");
    store
        .add_responses(DatasetForm::Chunked(&dataset), "chunked_fourD.h5")
        .unwrap();

    let parsed = store.get_chunked_object("chunked_fourD.h5").unwrap();
    assert_eq!(parsed, dataset);
    let stored = std::fs::read(
        store
            .entry_path("chunked_fourD.h5", DocumentKind::ChunkIndex)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(print(|d, o| granule_dap::print_chunk_index(d, o), &parsed), stored);
}

#[test]
fn missing_objects_are_reported() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    assert!(matches!(
        store.get_structured_object("nothing.h5"),
        Err(StoreError::EntryNotFound { .. })
    ));
    assert!(matches!(
        store.get_chunked_object("nothing.h5"),
        Err(StoreError::EntryNotFound { .. })
    ));

    // Looking does not leave lock files behind.
    let leftovers: Vec<_> = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".lock"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn datasets_that_cannot_be_read_back_are_not_stored() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let mut dataset = sample_dataset("anonymous");
    dataset
        .variables
        .push(Variable::new("v", DataType::Int32).with_dims(["unshared"]));

    let err = store
        .add_responses(DatasetForm::Dap4(&dataset), "anonymous.h5")
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Document(DapError::UnknownDimension { ref variable, ref dimension })
            if variable == "v" && dimension == "unshared"
    ));
    assert!(!store
        .entry_path("anonymous.h5", DocumentKind::Metadata)
        .unwrap()
        .exists());
    assert!(matches!(
        store.get_structured_object("anonymous.h5"),
        Err(StoreError::EntryNotFound { .. })
    ));
}

#[test]
fn corrupt_entries_fail_to_parse() {
    let cache = tempdir().unwrap();
    let store = open_store(cache.path());
    let path = store.entry_path("bad.h5", DocumentKind::Metadata).unwrap();
    std::fs::write(&path, b"<Dataset name=\"unterminated\">").unwrap();

    assert!(matches!(
        store.get_structured_object("bad.h5"),
        Err(StoreError::Document(_))
    ));
}
