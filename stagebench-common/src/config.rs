//! Harness configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional `stagebench.toml`, `STAGEBENCH_*` environment variables, and
//! finally whatever the CLI sets on the loaded [`HarnessConfig`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::bench::{BenchmarkRunner, DEFAULT_BENCH_TIMEOUT, DEFAULT_REPETITIONS};
use crate::cases::CASE_FILE_GLOB;
use crate::orchestrator::{DEFAULT_STAGE_TIMEOUT, Orchestrator};
use crate::process::ProcessRunner;
use crate::stage::{Stage, StageCommands};

/// File name looked up in the invocation root when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "stagebench.toml";

/// Prefix of every environment variable the harness reads.
pub const ENV_PREFIX: &str = "STAGEBENCH_";

const MAX_REPETITIONS: usize = 1000;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid duration for {key}: '{value}'")]
    InvalidDuration { key: String, value: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("{}", format_env_errors(.0))]
    Env(Vec<EnvError>),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    let mut out = format!("{} invalid environment variable(s):", errors.len());
    for error in errors {
        out.push_str("\n  - ");
        out.push_str(&error.to_string());
    }
    out
}

/// A single problem with one environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

type Lookup = Box<dyn Fn(&str) -> Option<String>>;

/// Reads prefixed environment variables, collecting every error so they can
/// be reported together.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Parser over the process environment with the `STAGEBENCH_` prefix.
    pub fn new() -> Self {
        Self::with_lookup(ENV_PREFIX, |name| std::env::var(name).ok())
    }

    /// Parser over an arbitrary variable source.
    pub fn with_lookup<F>(prefix: &'static str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        Self {
            prefix,
            lookup: Box::new(lookup),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Raw value, treating an empty variable as unset.
    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var = self.var_name(name);
        (self.lookup)(&var)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (var, value))
    }

    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.raw(name).map(|(_, value)| PathBuf::from(value))
    }

    /// A humantime duration such as `5s` or `1m 30s`; a bare number is seconds.
    pub fn get_duration(&mut self, name: &str) -> Option<Duration> {
        let (var, value) = self.raw(name)?;
        match parse_duration(&value) {
            Some(duration) => Some(duration),
            None => {
                self.errors.push(EnvError::InvalidDuration { var, value });
                None
            }
        }
    }

    pub fn get_usize_range(&mut self, name: &str, min: usize, max: usize) -> Option<usize> {
        let (var, value) = self.raw(name)?;
        match value.trim().parse::<usize>() {
            Ok(n) if (min..=max).contains(&n) => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                None
            }
        }
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    humantime::parse_duration(value)
        .ok()
        .or_else(|| value.parse::<u64>().ok().map(Duration::from_secs))
}

/// Shape of `stagebench.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bin_dir: Option<PathBuf>,
    bench_binary: Option<PathBuf>,
    test_root: Option<PathBuf>,
    bench_root: Option<PathBuf>,
    file_glob: Option<String>,
    stage_timeout: Option<String>,
    bench_timeout: Option<String>,
    repetitions: Option<usize>,
    csv_path: Option<PathBuf>,
    extra_args: Option<Vec<String>>,
    setups: Option<BTreeMap<String, PathBuf>>,
}

/// A non-fatal problem found by [`HarnessConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Resolved harness settings.
///
/// Path fields may be relative; [`HarnessConfig::resolve`] anchors them at
/// `root` when they are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub bench_binary: PathBuf,
    pub setups: BTreeMap<String, PathBuf>,
    pub test_root: PathBuf,
    pub bench_root: PathBuf,
    pub file_glob: String,
    pub stage_timeout: Duration,
    pub bench_timeout: Duration,
    pub repetitions: usize,
    pub csv_path: PathBuf,
    pub extra_args: Vec<String>,
}

impl HarnessConfig {
    /// Built-in defaults for a project rooted at `root`.
    pub fn defaults(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bin_dir: PathBuf::from("build/debug/bin"),
            bench_binary: PathBuf::from("build/release/bin/shell"),
            setups: BTreeMap::from([
                ("ours".to_string(), PathBuf::from("test/ours.sql")),
                ("tpch".to_string(), PathBuf::from("test/tpch.sql")),
            ]),
            test_root: PathBuf::from("test"),
            bench_root: PathBuf::from("benchmark"),
            file_glob: CASE_FILE_GLOB.to_string(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            bench_timeout: DEFAULT_BENCH_TIMEOUT,
            repetitions: DEFAULT_REPETITIONS,
            csv_path: PathBuf::from("benchmark.csv"),
            extra_args: Vec::new(),
        }
    }

    /// Defaults, then the config file, then the process environment.
    ///
    /// An explicitly named config file must exist; the implicit
    /// `stagebench.toml` is optional.
    pub fn load(root: impl Into<PathBuf>, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(root, config_file, EnvParser::new())
    }

    pub fn load_with_env(
        root: impl Into<PathBuf>,
        config_file: Option<&Path>,
        mut env: EnvParser,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(root);

        match config_file {
            Some(path) => {
                let path = config.resolve(path);
                config.apply_file(&path)?;
            }
            None => {
                let path = config.root.join(CONFIG_FILE_NAME);
                if path.is_file() {
                    config.apply_file(&path)?;
                }
            }
        }

        config.apply_env(&mut env)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");

        if let Some(value) = file.bin_dir {
            self.bin_dir = value;
        }
        if let Some(value) = file.bench_binary {
            self.bench_binary = value;
        }
        if let Some(value) = file.test_root {
            self.test_root = value;
        }
        if let Some(value) = file.bench_root {
            self.bench_root = value;
        }
        if let Some(value) = file.file_glob {
            self.file_glob = value;
        }
        if let Some(value) = file.stage_timeout {
            self.stage_timeout = file_duration("stage_timeout", &value)?;
        }
        if let Some(value) = file.bench_timeout {
            self.bench_timeout = file_duration("bench_timeout", &value)?;
        }
        if let Some(value) = file.repetitions {
            if !(1..=MAX_REPETITIONS).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: "repetitions".to_string(),
                    reason: format!("{value} is outside 1..={MAX_REPETITIONS}"),
                });
            }
            self.repetitions = value;
        }
        if let Some(value) = file.csv_path {
            self.csv_path = value;
        }
        if let Some(value) = file.extra_args {
            self.extra_args = value;
        }
        if let Some(value) = file.setups {
            self.setups = value;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &mut EnvParser) -> Result<(), ConfigError> {
        if let Some(value) = env.get_path("BIN_DIR") {
            self.bin_dir = value;
        }
        if let Some(value) = env.get_path("BENCH_BINARY") {
            self.bench_binary = value;
        }
        if let Some(value) = env.get_duration("STAGE_TIMEOUT") {
            self.stage_timeout = value;
        }
        if let Some(value) = env.get_duration("BENCH_TIMEOUT") {
            self.bench_timeout = value;
        }
        if let Some(value) = env.get_usize_range("REPETITIONS", 1, MAX_REPETITIONS) {
            self.repetitions = value;
        }
        if let Some(value) = env.get_path("CSV_PATH") {
            self.csv_path = value;
        }

        if env.has_errors() {
            return Err(ConfigError::Env(env.take_errors()));
        }
        Ok(())
    }

    /// Expand a leading `~/` and anchor relative paths at the invocation root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = expand_tilde(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.resolve(&self.bin_dir)
    }

    pub fn bench_binary(&self) -> PathBuf {
        self.resolve(&self.bench_binary)
    }

    pub fn test_root(&self) -> PathBuf {
        self.resolve(&self.test_root)
    }

    pub fn bench_root(&self) -> PathBuf {
        self.resolve(&self.bench_root)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.resolve(&self.csv_path)
    }

    pub fn setups(&self) -> BTreeMap<String, PathBuf> {
        self.setups
            .iter()
            .map(|(db, path)| (db.clone(), self.resolve(path)))
            .collect()
    }

    pub fn stage_commands(&self) -> StageCommands {
        StageCommands::new(self.bin_dir(), self.setups()).with_extra_args(self.extra_args.clone())
    }

    pub fn orchestrator(&self, runner: Arc<dyn ProcessRunner>) -> Orchestrator {
        Orchestrator::new(runner, self.stage_commands()).with_stage_timeout(self.stage_timeout)
    }

    pub fn benchmark_runner(&self, runner: Arc<dyn ProcessRunner>) -> BenchmarkRunner {
        BenchmarkRunner::new(runner, self.bench_binary())
            .with_extra_args(self.extra_args.clone())
            .with_repetitions(self.repetitions)
            .with_timeout(self.bench_timeout)
    }

    /// Problems that will surface later as failed stages or cases.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let bin_dir = self.bin_dir();
        for stage in Stage::ALL {
            let binary = bin_dir.join(stage.entry_point());
            if !binary.is_file() {
                warnings.push(ConfigWarning {
                    key: "bin_dir".to_string(),
                    message: format!("{stage} binary not found at {}", binary.display()),
                });
            }
        }

        let bench_binary = self.bench_binary();
        if !bench_binary.is_file() {
            warnings.push(ConfigWarning {
                key: "bench_binary".to_string(),
                message: format!("benchmark binary not found at {}", bench_binary.display()),
            });
        }

        for (db, path) in self.setups() {
            if !path.is_file() {
                warnings.push(ConfigWarning {
                    key: format!("setups.{db}"),
                    message: format!("setup file not found at {}", path.display()),
                });
            }
        }

        warnings
    }
}

fn file_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
