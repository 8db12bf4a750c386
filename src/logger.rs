//! Logging facade.
//!
//! [`init`] installs a global `tracing` subscriber that writes to a
//! size-rotated log file (and optionally stdout). The `info` / `warn` /
//! `error` / `debug` / `dpanic` helpers log a message together with a map of
//! structured fields, for callers that build their fields dynamically.

use crate::config::LoggerConfig;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Structured fields attached to one log line.
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid log level '{level}': {message}")]
    Filter { level: String, message: String },

    #[error("Global logger already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Append-only file that is renamed to `<name>.1` once it exceeds `max_bytes`.
///
/// Shared between threads; each write holds the lock for the whole line.
#[derive(Debug)]
pub struct RollingFile {
    path: PathBuf,
    max_bytes: u64,
    state: Mutex<RollingState>,
}

#[derive(Debug)]
struct RollingState {
    file: File,
    written: u64,
}

impl RollingFile {
    /// Open (or create) `path` for appending; parent directories are created.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, LoggerError> {
        let path = path.into();
        let io_err = |source| LoggerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let file = open_append(&path).map_err(io_err)?;
        let written = file.metadata().map_err(io_err)?.len();

        Ok(Self {
            path,
            max_bytes,
            state: Mutex::new(RollingState { file, written }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the active file is moved to on rotation.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut RollingState) -> io::Result<()> {
        state.file.flush()?;
        std::fs::rename(&self.path, self.rotated_path())?;
        state.file = open_append(&self.path)?;
        state.written = 0;
        Ok(())
    }
}

impl Write for &RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.written > 0 && state.written + buf.len() as u64 > self.max_bytes {
            self.rotate(&mut state)?;
        }

        state.file.write_all(buf)?;
        state.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Build the subscriber described by `config` without installing it.
///
/// `RUST_LOG` overrides `config.level` when set.
pub fn subscriber(
    config: &LoggerConfig,
) -> Result<impl Subscriber + Send + Sync + 'static, LoggerError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggerError::Filter {
            level: config.level.clone(),
            message: e.to_string(),
        })?;

    let file = Arc::new(RollingFile::open(config.file_path(), config.max_size_bytes())?);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.json {
        layers.push(fmt::layer().json().with_writer(file).boxed());
        if config.stdout {
            layers.push(fmt::layer().json().with_writer(io::stdout).boxed());
        }
    } else {
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .boxed(),
        );
        if config.stdout {
            layers.push(fmt::layer().with_target(true).with_writer(io::stdout).boxed());
        }
    }

    Ok(tracing_subscriber::registry().with(layers).with(filter))
}

/// Install the logger globally. Fails if a global subscriber already exists.
pub fn init(config: &LoggerConfig) -> Result<(), LoggerError> {
    subscriber(config)?
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))
}

/// Renders fields as a JSON object.
struct JsonFields<'a>(&'a Fields);

impl std::fmt::Display for JsonFields<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

pub fn debug(msg: &str, fields: &Fields) {
    tracing::debug!(fields = %JsonFields(fields), "{}", msg);
}

pub fn info(msg: &str, fields: &Fields) {
    tracing::info!(fields = %JsonFields(fields), "{}", msg);
}

pub fn warn(msg: &str, fields: &Fields) {
    tracing::warn!(fields = %JsonFields(fields), "{}", msg);
}

pub fn error(msg: &str, fields: &Fields) {
    tracing::error!(fields = %JsonFields(fields), "{}", msg);
}

/// Log at ERROR, then panic in debug builds.
pub fn dpanic(msg: &str, fields: &Fields) {
    tracing::error!(fields = %JsonFields(fields), dpanic = true, "{}", msg);
    if cfg!(debug_assertions) {
        panic!("{}", msg);
    }
}
