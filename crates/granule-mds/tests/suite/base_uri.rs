use granule_mds::{inject_base_uri, StoreError, CHUNK_SIZE};
use std::io::{self, Read};

/// Hands out at most `step` bytes per read.
struct Trickle<'a> {
    data: &'a [u8],
    step: usize,
}

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

struct Broken;

impl Read for Broken {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "descriptor closed"))
    }
}

const BASE: &str = "https://data.example.org/granules/chunked_fourD.h5";

fn document(lead_in: usize, body_vars: usize) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!--");
    doc.push_str(&"x".repeat(lead_in));
    doc.push_str("-->\n<Dataset xmlns=\"http://xml.opendap.org/ns/DAP/4.0#\" name=\"chunked_fourD.h5\">\n");
    for i in 0..body_vars {
        doc.push_str(&format!("    <Float32 name=\"v{i}\"/>\n"));
    }
    doc.push_str("</Dataset>\n");
    doc
}

fn expected(doc: &str) -> String {
    doc.replacen("<Dataset xmlns=", &format!("<Dataset xml:base=\"{BASE}\" xmlns="), 1)
}

fn run<R: Read>(mut input: R) -> String {
    let mut out = Vec::new();
    inject_base_uri(&mut input, &mut out, BASE).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn large_documents_get_exactly_one_base() {
    let doc = document(16, 4 * CHUNK_SIZE / 20);
    assert!(doc.len() > 3 * CHUNK_SIZE);

    let out = run(doc.as_bytes());
    assert_eq!(out.matches("xml:base=").count(), 1);
    assert_eq!(out, expected(&doc));
}

#[test]
fn root_tag_straddling_a_chunk_boundary() {
    // Slide the root tag across the first read boundary one byte at a time.
    let prolog_len = document(0, 0).find("<Dataset").unwrap();
    for shift in 0..80 {
        let lead_in = CHUNK_SIZE - prolog_len - 40 + shift;
        let doc = document(lead_in, 600);
        let out = run(doc.as_bytes());
        assert_eq!(out.matches("xml:base=").count(), 1, "shift {shift}");
        assert_eq!(out, expected(&doc), "shift {shift}");
    }
}

#[test]
fn byte_at_a_time_input() {
    let doc = document(100, 50);
    let out = run(Trickle {
        data: doc.as_bytes(),
        step: 1,
    });
    assert_eq!(out, expected(&doc));
}

#[test]
fn odd_sized_reads() {
    let doc = document(5000, 2000);
    for step in [7, 1021, CHUNK_SIZE - 1, CHUNK_SIZE + 1] {
        let out = run(Trickle {
            data: doc.as_bytes(),
            step,
        });
        assert_eq!(out, expected(&doc), "step {step}");
    }
}

#[test]
fn existing_base_is_replaced_not_duplicated() {
    let doc = "<Dataset xml:base=\"http://old.example.org/x.h5\" name=\"x\">\n</Dataset>\n";
    let out = run(doc.as_bytes());
    assert_eq!(
        out,
        format!("<Dataset xml:base=\"{BASE}\" name=\"x\">\n</Dataset>\n")
    );
}

#[test]
fn unreadable_input_is_an_error() {
    let mut out = Vec::new();
    let err = inject_base_uri(&mut Broken, &mut out, BASE).unwrap_err();
    assert!(matches!(err, StoreError::InputUnreadable { .. }));
    assert_eq!(err.category(), granule_mds::ErrorCategory::NotFound);
    assert!(out.is_empty());
}
