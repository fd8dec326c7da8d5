//! Streaming `xml:base` injection for chunk-index responses.
//!
//! Chunk-index documents are served from the cache for any number of hosts, so
//! the URL of the underlying data is stamped onto the root element on the way
//! out instead of being stored.

use crate::error::{Result, StoreError};
use std::io::{self, Read, Write};

/// Read size used when copying documents.
pub const CHUNK_SIZE: usize = 16 * 1024;

const BASE_ATTRIBUTE: &[u8] = b"xml:base";

/// Copy `input` to `output`, setting `xml:base="<base_uri>"` on the root element.
///
/// Only the root start tag is buffered; everything else is copied in
/// [`CHUNK_SIZE`] pieces. An existing `xml:base` on the root is replaced. A
/// document without a root element is copied unchanged.
pub fn inject_base_uri<R, W>(input: &mut R, output: &mut W, base_uri: &str) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut scanner = PrologScanner::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut injected = false;

    loop {
        let n = match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(StoreError::InputUnreadable { source }),
        };
        let data = &chunk[..n];

        if injected {
            output.write_all(data)?;
            continue;
        }

        let root_end = scanner.feed(data);
        output.write_all(&scanner.passthrough)?;
        scanner.passthrough.clear();

        if let Some(end) = root_end {
            output.write_all(&rewrite_root_tag(&scanner.root, base_uri))?;
            output.write_all(&data[end..])?;
            injected = true;
        }
    }

    if !injected {
        output.write_all(&scanner.finish())?;
    }
    output.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Prolog,
    /// Saw `<`, not yet known what it opens.
    Open,
    Instruction {
        prev: u8,
    },
    /// Saw `<!`.
    Bang,
    /// Saw `<!-`.
    BangDash,
    Comment {
        dashes: u8,
    },
    Doctype {
        quote: Option<u8>,
        depth: u32,
    },
    Root {
        quote: Option<u8>,
    },
}

/// Walks the prolog byte by byte, passing it through and capturing the root tag.
#[derive(Debug, Default)]
struct PrologScanner {
    state: State,
    passthrough: Vec<u8>,
    root: Vec<u8>,
}

impl PrologScanner {
    /// Consume `data`. Returns the index just past the root tag's `>` once the
    /// whole tag has been seen.
    fn feed(&mut self, data: &[u8]) -> Option<usize> {
        for (idx, &b) in data.iter().enumerate() {
            if self.step(b) {
                return Some(idx + 1);
            }
        }
        None
    }

    fn step(&mut self, b: u8) -> bool {
        match self.state {
            State::Prolog => {
                if b == b'<' {
                    self.state = State::Open;
                } else {
                    self.passthrough.push(b);
                }
            }
            State::Open => match b {
                b'?' => {
                    self.passthrough.extend_from_slice(b"<?");
                    self.state = State::Instruction { prev: 0 };
                }
                b'!' => {
                    self.passthrough.extend_from_slice(b"<!");
                    self.state = State::Bang;
                }
                _ => {
                    self.root.push(b'<');
                    self.state = State::Root { quote: None };
                    return self.step(b);
                }
            },
            State::Instruction { prev } => {
                self.passthrough.push(b);
                self.state = if prev == b'?' && b == b'>' {
                    State::Prolog
                } else {
                    State::Instruction { prev: b }
                };
            }
            State::Bang => {
                self.passthrough.push(b);
                self.state = if b == b'-' {
                    State::BangDash
                } else {
                    State::Doctype {
                        quote: None,
                        depth: u32::from(b == b'['),
                    }
                };
            }
            State::BangDash => {
                self.passthrough.push(b);
                self.state = if b == b'-' {
                    State::Comment { dashes: 0 }
                } else {
                    State::Doctype {
                        quote: None,
                        depth: 0,
                    }
                };
            }
            State::Comment { dashes } => {
                self.passthrough.push(b);
                self.state = match b {
                    b'>' if dashes >= 2 => State::Prolog,
                    b'-' => State::Comment {
                        dashes: dashes.saturating_add(1).min(2),
                    },
                    _ => State::Comment { dashes: 0 },
                };
            }
            State::Doctype { quote, depth } => {
                self.passthrough.push(b);
                self.state = match (quote, b) {
                    (Some(q), _) if b == q => State::Doctype { quote: None, depth },
                    (Some(_), _) => State::Doctype { quote, depth },
                    (None, b'"' | b'\'') => State::Doctype {
                        quote: Some(b),
                        depth,
                    },
                    (None, b'[') => State::Doctype {
                        quote,
                        depth: depth + 1,
                    },
                    (None, b']') => State::Doctype {
                        quote,
                        depth: depth.saturating_sub(1),
                    },
                    (None, b'>') if depth == 0 => State::Prolog,
                    _ => State::Doctype { quote, depth },
                };
            }
            State::Root { quote } => {
                self.root.push(b);
                match (quote, b) {
                    (Some(q), _) if b == q => self.state = State::Root { quote: None },
                    (Some(_), _) => {}
                    (None, b'"' | b'\'') => self.state = State::Root { quote: Some(b) },
                    (None, b'>') => return true,
                    _ => {}
                }
            }
        }
        false
    }

    /// Bytes still held back when the input ends before a root tag completes.
    fn finish(mut self) -> Vec<u8> {
        if self.state == State::Open {
            self.passthrough.push(b'<');
        }
        self.passthrough.append(&mut self.root);
        self.passthrough
    }
}

/// Rebuild `<Name attrs...>` with `xml:base` placed right after the element
/// name and any previous `xml:base` dropped. Other attributes keep their
/// original bytes and order.
fn rewrite_root_tag(tag: &[u8], base_uri: &str) -> Vec<u8> {
    let is_delim = |b: u8| b.is_ascii_whitespace() || matches!(b, b'/' | b'>');
    let name_end = tag
        .iter()
        .skip(1)
        .position(|&b| is_delim(b))
        .map_or(tag.len(), |p| p + 1);
    if name_end <= 1 {
        return tag.to_vec();
    }

    let escaped = granule_dap::escape_xml(base_uri);
    let mut out = Vec::with_capacity(tag.len() + escaped.len() + 12);
    out.extend_from_slice(&tag[..name_end]);
    out.extend_from_slice(b" xml:base=\"");
    out.extend_from_slice(escaped.as_bytes());
    out.push(b'"');

    let skip_ws = |mut i: usize| {
        while i < tag.len() && tag[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    let mut i = name_end;
    while i < tag.len() {
        let start = i;
        let name_start = skip_ws(i);
        i = name_start;
        while i < tag.len() && !is_delim(tag[i]) && tag[i] != b'=' {
            i += 1;
        }
        if i == name_start {
            out.extend_from_slice(&tag[start..]);
            break;
        }
        let name = &tag[name_start..i];

        let mut j = skip_ws(i);
        if j < tag.len() && tag[j] == b'=' {
            j = skip_ws(j + 1);
            if j < tag.len() && matches!(tag[j], b'"' | b'\'') {
                let q = tag[j];
                j += 1;
                while j < tag.len() && tag[j] != q {
                    j += 1;
                }
                j = (j + 1).min(tag.len());
            }
            i = j;
        }

        if name != BASE_ATTRIBUTE {
            out.extend_from_slice(&tag[start..i]);
        }
    }
    out
}
