use super::{open_store, sample_dataset};
use granule_core::FileContainer;
use granule_dap::Dataset;
use granule_mds::{DatasetForm, DocumentKind, ResponseContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn concurrent_writers_and_readers_never_see_partial_documents() {
    let cache = tempdir().unwrap();
    let store = Arc::new(open_store(cache.path()));
    let dataset = sample_dataset("shared");
    let mut expected = Vec::new();
    granule_dap::print_metadata(&dataset, &mut expected).unwrap();

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let dataset = dataset.clone();
            let expected = expected.clone();
            let absent = cache.path().join("absent.h5");
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    if i % 2 == 0 {
                        assert!(store
                            .add_responses(DatasetForm::Dap4(&dataset), "data/shared.h5")
                            .unwrap());
                    } else {
                        let token = store
                            .is_available(&absent, "data/shared.h5", "h5", DocumentKind::Metadata)
                            .unwrap();
                        if token.is_available() {
                            let mut out = Vec::new();
                            token.copy_to(&mut out).unwrap();
                            assert_eq!(out, expected);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let leftovers: Vec<_> = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn concurrent_misses_build_the_document_once() {
    let cache = tempdir().unwrap();
    let store = Arc::new(open_store(cache.path()));
    let builds = Arc::new(AtomicUsize::new(0));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let builds = Arc::clone(&builds);
            let barrier = Arc::clone(&barrier);
            let container = FileContainer::new(cache.path().join("absent.h5"), "data/a.h5", "h5");
            thread::spawn(move || {
                let builder = |c: &dyn granule_core::Container| -> granule_mds::Result<Dataset> {
                    builds.fetch_add(1, Ordering::SeqCst);
                    // Keep the other callers waiting on the entry lock.
                    thread::sleep(Duration::from_millis(100));
                    Ok(sample_dataset(c.relative_name()))
                };
                barrier.wait();
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
                out
            })
        })
        .collect();

    let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outputs.iter().all(|out| out == &outputs[0]));
    assert!(!outputs[0].is_empty());
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}
