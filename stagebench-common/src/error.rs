//! Error taxonomy shared by the runners and loaders.
//!
//! Stage-level expectation mismatches live in [`crate::stage::StageFailure`]
//! and benchmark case failures in [`crate::bench::BenchmarkError`]; this
//! module covers the process and input layers underneath them.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while launching a subprocess or loading declarative input.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to write input to process: {0}")]
    StdinWrite(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input {}: {reason}", path.display())]
    MalformedInput { path: PathBuf, reason: String },
}

impl HarnessError {
    /// Build a [`HarnessError::MalformedInput`] for `path`.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
