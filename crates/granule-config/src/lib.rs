//! Configuration for Granule servers.
//!
//! Settings are read from a TOML file with two tables:
//!
//! ```toml
//! [metadata_store]
//! path = "/var/cache/granule/mds"
//! prefix = "mds"
//! max_entries = 5000
//! purge_fraction = 0.8
//! inventory = "/var/cache/granule/mds_ledger.txt"
//! freshness_tolerance_ms = 0
//!
//! [logging]
//! level = "info"
//! json = false
//! stderr = true
//! file = "/var/log/granule.log"
//! ```
//!
//! Every key is optional.

use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// Environment variable naming the config file to load.
pub const GRANULE_CONFIG_ENV_VAR: &str = "GRANULE_CONFIG";

/// Prefix used for store files when none is configured.
pub const DEFAULT_STORE_PREFIX: &str = "mds";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GranuleConfig {
    /// Where and how generated metadata documents are cached.
    #[serde(default)]
    pub metadata_store: MetadataStoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataStoreConfig {
    /// Cache directory. Unset or empty selects the system temp directory,
    /// which must already exist; any other directory is created on demand.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Prepended to every file the store writes.
    #[serde(default = "MetadataStoreConfig::default_prefix")]
    pub prefix: String,

    /// Entry count that triggers a purge. `0` disables purging.
    #[serde(default)]
    pub max_entries: u64,

    /// A purge deletes entries until at most `max_entries * purge_fraction` remain.
    #[serde(default = "MetadataStoreConfig::default_purge_fraction")]
    pub purge_fraction: f64,

    /// Optional append-only log of added and removed datasets.
    #[serde(default)]
    pub inventory: Option<PathBuf>,

    /// How far a source file's mtime may run ahead of its entry before the
    /// entry counts as stale.
    #[serde(default)]
    pub freshness_tolerance_ms: u64,
}

impl MetadataStoreConfig {
    fn default_prefix() -> String {
        DEFAULT_STORE_PREFIX.to_owned()
    }

    fn default_purge_fraction() -> f64 {
        0.8
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// The directory the store should use.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => Self::default_dir(),
        }
    }

    /// True when no explicit directory was configured.
    pub fn uses_default_dir(&self) -> bool {
        self.path.as_ref().map_or(true, |p| p.as_os_str().is_empty())
            || self.resolved_path() == Self::default_dir()
    }

    pub fn default_dir() -> PathBuf {
        std::env::temp_dir()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_entries == 0
    }

    pub fn freshness_tolerance(&self) -> Duration {
        Duration::from_millis(self.freshness_tolerance_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::invalid(
                "metadata_store.prefix",
                "must not be empty",
            ));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                "metadata_store.prefix",
                "must not contain a path separator",
            ));
        }
        if !(self.purge_fraction > 0.0 && self.purge_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "metadata_store.purge_fraction",
                format!("must be in (0, 1], got {}", self.purge_fraction),
            ));
        }
        Ok(())
    }

    /// Lower-case the prefix so file names do not depend on how it was typed.
    fn normalize(&mut self) {
        self.prefix = self.prefix.to_lowercase();
    }
}

impl Default for MetadataStoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            prefix: Self::default_prefix(),
            max_entries: 0,
            purge_fraction: Self::default_purge_fraction(),
            inventory: None,
            freshness_tolerance_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file logging
    /// is disabled and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level, with `RUST_LOG` merged in when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    // `toml` error messages can quote user values (paths, prefixes). Redact
    // quoted substrings, honouring escaped quotes inside them.
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    static SINGLE_QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();

    let re = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    let mut out = re.replace_all(message, r#""<redacted>""#).into_owned();

    let re_single = SINGLE_QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#"'(?:\\.|[^'\\])*'"#)
            .expect("single-quoted-string regex should compile")
    });
    out = re_single.replace_all(&out, "'<redacted>'").into_owned();

    // `unknown field `x`, expected ...` names a user key; `missing field `x`` names ours.
    if let Some(start) = out.find("unknown field `").map(|pos| pos + "unknown field ".len()) {
        let after_start = &out[start + 1..];
        if let Some(end_rel) = after_start.find('`') {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl GranuleConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: GranuleConfig = toml::from_str(text)?;
        config.metadata_store.normalize();
        config.metadata_store.validate()?;
        Ok(config)
    }

    /// Load the file named by `GRANULE_CONFIG`, or the defaults when it is unset.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(GRANULE_CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load_from_path(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock().unwrap_or_else(|p| p.into_inner()),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has an effect. Returns
/// whether this call installed the subscriber.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file_path = config.file.as_ref();
        let file = file_path
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));
        let file_open_failed = file_path.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            // `TestWriter` cooperates with libtest output capture in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            installed = true;
            if file_open_failed {
                if let Some(path) = file_path {
                    tracing::warn!(
                        target: "granule.config",
                        path = %path.display(),
                        "failed to open log file; file logging is disabled"
                    );
                }
            }
        }
    });
    installed
}
