//! Logging setup
//!
//! Installs a `tracing` subscriber with an env-overridable filter, a compact
//! stderr layer and, when configured, a plain-text file layer. The file is
//! replaced at startup and buffered; write failures are dropped.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{RemoteViewError, Result};

/// Crates whose level the configured level applies to
const OWN_TARGETS: &[&str] = &["remoteview_core", "remoteview"];

/// Logging settings (`[logging]` in config.toml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level for remoteview's own targets (error, warn, info, debug, trace)
    #[serde(default = "default_level")]
    pub level: String,

    /// Also write log lines to this file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Include the event target in each line
    #[serde(default)]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            with_target: false,
        }
    }
}

impl LoggingSettings {
    /// Override the level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the log file
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Buffered log file shared by every writer the fmt layer makes
#[derive(Clone)]
struct LogFile {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogFile {
    fn create(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .map_err(|e| RemoteViewError::Io(format!("failed to create {:?}: {}", path, e)))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    fn flush_quietly(&self) {
        let _ = self.inner.lock().flush();
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.inner.lock().write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_quietly();
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Keeps the log file alive; flushes it on drop
#[must_use = "dropping the guard flushes and detaches the log file"]
pub struct LoggingGuard {
    file: Option<LogFile>,
}

impl LoggingGuard {
    /// Flush buffered file output now
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            file.flush_quietly();
        }
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        self.flush();
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for target in OWN_TARGETS {
        let directive = format!("{}={}", target, level)
            .parse()
            .map_err(|e| RemoteViewError::config(format!("invalid log level {:?}: {}", level, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Build a dispatcher for `settings` without installing it
pub fn build(settings: &LoggingSettings) -> Result<(Dispatch, LoggingGuard)> {
    let filter = build_filter(&settings.level)?;
    let file = settings.file.as_ref().map(LogFile::create).transpose()?;

    let file_layer = file.clone().map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(settings.with_target)
            .with_writer(file)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(settings.with_target)
                .with_writer(io::stderr),
        )
        .with(file_layer);

    Ok((Dispatch::new(subscriber), LoggingGuard { file }))
}

/// Install the global subscriber
///
/// Fails with `InvalidState` if one is already installed.
pub fn init(settings: &LoggingSettings) -> Result<LoggingGuard> {
    let (dispatch, guard) = build(settings)?;
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|_| RemoteViewError::invalid_state("a global logger is already installed"))?;
    Ok(guard)
}
