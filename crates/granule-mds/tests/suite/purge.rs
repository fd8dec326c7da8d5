use super::{config, sample_dataset};
use granule_mds::{DatasetForm, DocumentKind, MetadataStore};
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn bounded_store(dir: &std::path::Path, max_entries: u64) -> MetadataStore {
    let mut config = config(dir);
    config.max_entries = max_entries;
    MetadataStore::open(&config).unwrap()
}

fn age_entry(store: &MetadataStore, name: &str, age_secs: u64) {
    let path = store.entry_path(name, DocumentKind::Metadata).unwrap();
    super::set_mtime(&path, SystemTime::now() - Duration::from_secs(age_secs));
}

#[test]
fn storing_past_the_limit_evicts_the_oldest_entries() {
    let cache = tempdir().unwrap();
    let store = bounded_store(cache.path(), 5);
    assert!(!store.is_unlimited());

    let dataset = sample_dataset("d");
    for i in 0..5 {
        let name = format!("d{i}");
        store.add_responses(DatasetForm::Dap4(&dataset), &name).unwrap();
        age_entry(&store, &name, 1000 - i * 100);
    }
    assert_eq!(store.cache_info().unwrap().unwrap().entries, 5);

    // The sixth entry pushes the store over; floor(5 * 0.8) = 4 remain.
    store.add_responses(DatasetForm::Dap4(&dataset), "d5").unwrap();

    let info = store.cache_info().unwrap().unwrap();
    assert_eq!(info.entries, 4);
    let survivors: Vec<_> = (0..6)
        .filter(|i| {
            store
                .entry_path(&format!("d{i}"), DocumentKind::Metadata)
                .unwrap()
                .exists()
        })
        .collect();
    assert_eq!(survivors, vec![2, 3, 4, 5]);
    assert_eq!(
        info.last_entry.as_deref(),
        store
            .entry_path("d5", DocumentKind::Metadata)
            .unwrap()
            .file_name()
            .and_then(|n| n.to_str())
    );
}

#[test]
fn explicit_purge_reports_what_it_did() {
    let cache = tempdir().unwrap();
    let dataset = sample_dataset("d");
    {
        let unbounded = bounded_store(cache.path(), 0);
        for i in 0..10 {
            let name = format!("d{i}");
            unbounded.add_responses(DatasetForm::Dap4(&dataset), &name).unwrap();
            age_entry(&unbounded, &name, 1000 - i * 10);
        }
        let report = unbounded.update_and_purge(None).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.after_entries, 10);
    }

    let bounded = bounded_store(cache.path(), 4);
    let report = bounded.update_and_purge(None).unwrap();
    assert_eq!(report.before_entries, 10);
    assert_eq!(report.after_entries, 3);
    assert_eq!(report.deleted_entries(), 7);
    assert!(report.after_bytes < report.before_bytes);
    assert!(report.failed.is_empty());
}

#[test]
fn entries_being_read_are_not_purged() {
    let cache = tempdir().unwrap();
    let dataset = sample_dataset("d");
    let store = bounded_store(cache.path(), 2);
    store.add_responses(DatasetForm::Dap4(&dataset), "d0").unwrap();
    store.add_responses(DatasetForm::Dap4(&dataset), "d1").unwrap();
    age_entry(&store, "d0", 500);
    age_entry(&store, "d1", 400);

    let reader = store
        .is_available(
            &cache.path().join("absent"),
            "d0",
            "h5",
            DocumentKind::Metadata,
        )
        .unwrap();
    assert!(reader.is_available());

    // Over the limit with d2; target is 1. d0 is locked, d2 is protected.
    store.add_responses(DatasetForm::Dap4(&dataset), "d2").unwrap();

    assert!(reader.read_to_string().is_ok());
    assert!(!store.entry_path("d1", DocumentKind::Metadata).unwrap().exists());
    assert!(store.entry_path("d2", DocumentKind::Metadata).unwrap().exists());
}
