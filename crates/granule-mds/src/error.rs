use crate::key::DocumentKind;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the metadata store.
///
/// Operations that can legitimately do nothing (`store_response`, `add_responses`,
/// `remove`) report that through their `bool` result; everything here is a real
/// failure and always reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("metadata store directory {path} is unusable: {message}")]
    Configuration { path: PathBuf, message: String },

    #[error("resource names must not be empty")]
    EmptyName,

    #[error("cache file name is longer than 254 characters ({len}): {name}")]
    NameTooLong { name: String, len: usize },

    #[error("required context value `{key}` is not set")]
    MissingContext { key: &'static str },

    #[error("no metadata store entry at {path}")]
    EntryNotFound { path: PathBuf },

    #[error("could not read the input document: {source}")]
    InputUnreadable {
        #[source]
        source: std::io::Error,
    },

    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },

    #[error("cached document is unreadable: {0}")]
    Document(#[from] granule_dap::DapError),

    #[error("document generator failed: {message}")]
    Generator { message: String },

    #[error("the {kind} response for `{name}` came out empty")]
    EmptyResponse { name: String, kind: DocumentKind },
}

/// The coarse classes callers can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    InvalidArgument,
    NotFound,
    Lock,
    Io,
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Configuration { .. } => ErrorCategory::Configuration,
            StoreError::EmptyName
            | StoreError::NameTooLong { .. }
            | StoreError::MissingContext { .. } => ErrorCategory::InvalidArgument,
            StoreError::EntryNotFound { .. } | StoreError::InputUnreadable { .. } => {
                ErrorCategory::NotFound
            }
            StoreError::Lock { .. } => ErrorCategory::Lock,
            StoreError::Io(_)
            | StoreError::Json { .. }
            | StoreError::Document(_)
            | StoreError::Generator { .. }
            | StoreError::EmptyResponse { .. } => ErrorCategory::Io,
        }
    }

    pub fn generator(message: impl Into<String>) -> Self {
        StoreError::Generator {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        // Bookkeeping files record dataset names; keep them out of error messages.
        let message = sanitize_json_error_message(&err.to_string());
        Self::Json { message }
    }
}

fn sanitize_json_error_message(message: &str) -> String {
    // Redact every double-quoted substring but keep the line/column info.
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let mut end = None;
        let bytes = rest.as_bytes();
        for (idx, &b) in bytes.iter().enumerate() {
            if b != b'"' {
                continue;
            }

            // Treat quotes preceded by an odd number of backslashes as escaped.
            let mut backslashes = 0usize;
            let mut k = idx;
            while k > 0 && bytes[k - 1] == b'\\' {
                backslashes += 1;
                k -= 1;
            }
            if backslashes % 2 == 0 {
                end = Some(idx);
                break;
            }
        }

        let Some(end) = end else {
            out.push_str("<redacted>");
            rest = "";
            break;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    // `unknown field `name`, expected ...`: redact the first backticked segment.
    if let Some(start) = out.find('`') {
        let after_start = &out[start + 1..];
        let end_rel = after_start
            .find("`, expected")
            .or_else(|| after_start.find('`'));
        if let Some(end_rel) = end_rel {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}
