//! Subcommand implementations.

pub mod bench;

pub use bench::BenchArgs;
pub use test::TestArgs;

use stagebench_common::ConfigWarning;
use tracing::warn;

/// Log the configuration warnings whose key starts with one of `prefixes`.
pub(crate) fn warn_config(warnings: &[ConfigWarning], prefixes: &[&str]) {
    for warning in warnings
        .iter()
        .filter(|w| prefixes.iter().any(|p| w.key.starts_with(p)))
    {
        warn!(key = %warning.key, "{}", warning.message);
    }
}
