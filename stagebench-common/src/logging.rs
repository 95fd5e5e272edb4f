//! Structured logging setup.
//!
//! All diagnostics go through `tracing`. The console layer is formatted per
//! [`LogFormat`]; when a log directory is configured a JSON file layer is
//! added behind a non-blocking writer whose guard lives in [`LoggingGuards`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Filter directive variable, e.g. `STAGEBENCH_LOG=stagebench_common=debug`.
pub const LOG_ENV: &str = "STAGEBENCH_LOG";
/// Console format variable: `pretty`, `compact` or `json`.
pub const LOG_FORMAT_ENV: &str = "STAGEBENCH_LOG_FORMAT";

const LOG_FILE_PREFIX: &str = "stagebench";
const LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to open log directory {}: {reason}", path.display())]
    LogDir { path: PathBuf, reason: String },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Console output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive string.
    pub level: String,
    pub format: LogFormat,
    pub stderr: bool,
    pub ansi: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            stderr: false,
            ansi: true,
            log_dir: None,
        }
    }
}

impl LogConfig {
    /// `default_level` unless `STAGEBENCH_LOG` is set; format from
    /// `STAGEBENCH_LOG_FORMAT`, ignoring values it does not recognize.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var(LOG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        Self {
            level,
            format,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Keeps background log writers alive; dropping it flushes them.
#[must_use = "dropping the guards stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter =
        EnvFilter::try_new(&config.level).map_err(|source| LoggingError::InvalidFilter {
            directive: config.level.clone(),
            source,
        })?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut guards = LoggingGuards::default();

    if let Some(dir) = &config.log_dir {
        let (layer, guard) = file_layer(dir)?;
        layers.push(layer);
        guards._file = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(guards)
}

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let writer = if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(config.ansi)
        .with_target(false);

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}

fn file_layer(dir: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    std::fs::create_dir_all(dir).map_err(|e| LoggingError::LogDir {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(dir)
        .map_err(|e| LoggingError::LogDir {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(true)
        .with_thread_ids(true)
        .boxed();
    Ok((layer, guard))
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Route `tracing` output through the test harness's captured writer.
/// Safe to call from every test.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .compact()
            .try_init();
    });
}
