//! Declarative test and benchmark files: discovery, parsing, validation.
//!
//! Files are YAML. Anything that does not fit the expected shape is reported
//! as [`HarnessError::MalformedInput`] so the driver can count the file as bad
//! and move on.
//!
//! Test file:
//! ```yaml
//! description: "projection of a single column"
//! db: ours
//! query: SELECT a FROM R;
//! required: true
//! stages:
//!   lexer:
//!   parser:
//!     returncode: 0
//!   end2end:
//!     out: |
//!       1
//!       2
//! ```
//!
//! Benchmark file:
//! ```yaml
//! suite: operators
//! benchmark: group_by
//! description: "Group by a single i32 column"
//! pattern: '^Execute query:.*'
//! cases:
//!   10: SELECT COUNT(*) FROM t GROUP BY a10;
//!   100: SELECT COUNT(*) FROM t GROUP BY a100;
//! ```

use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::{HarnessError, HarnessResult};
use crate::stage::{Expectation, Stage, StageCommands};

/// Default glob for case files below a root; `_`-prefixed files are schemas.
pub const CASE_FILE_GLOB: &str = "**/[!_]*.yml";

/// One stage to run and the checks that apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: Stage,
    pub expectation: Expectation,
}

/// A loaded integration test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub filename: PathBuf,
    pub description: String,
    pub db: String,
    pub query: String,
    pub required: bool,
    pub stages: Vec<StageSpec>,
}

/// A named query inside a benchmark file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkCase {
    pub name: String,
    pub query: String,
}

/// A loaded benchmark file.
#[derive(Debug, Clone)]
pub struct BenchmarkFile {
    pub path: PathBuf,
    /// File stem; distinguishes several files of the same benchmark.
    pub name: String,
    pub suite: String,
    pub benchmark: String,
    pub description: String,
    pub pattern: Regex,
    pub cases: Vec<BenchmarkCase>,
}

impl BenchmarkFile {
    /// Schema loaded by the engine before the benchmark queries run.
    pub fn schema_path(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("data")
            .join("schema.sql")
    }
}

/// Mapping that keeps the order of keys in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderedMap<K, V>(Vec<(K, V)>);

impl<'de, K, V> Deserialize<'de> for OrderedMap<K, V>
where
    K: Deserialize<'de> + PartialEq + fmt::Debug,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K, V> Visitor<'de> for OrderedVisitor<K, V>
        where
            K: Deserialize<'de> + PartialEq + fmt::Debug,
            V: Deserialize<'de>,
        {
            type Value = OrderedMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(K, V)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<K, V>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(de::Error::custom(format!("duplicate key {key:?}")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Distinguishes "key present with null" (`Some(None)`) from "key absent" (`None`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    #[serde(default, deserialize_with = "present")]
    returncode: Option<Option<i32>>,
    #[serde(default, deserialize_with = "present")]
    num_err: Option<Option<usize>>,
    #[serde(default, deserialize_with = "present")]
    err: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    out: Option<Option<String>>,
}

impl From<RawStage> for Expectation {
    fn from(raw: RawStage) -> Self {
        Self {
            returncode: raw.returncode.map(Option::unwrap_or_default),
            num_err: raw.num_err.map(Option::unwrap_or_default),
            err: raw.err.map(Option::unwrap_or_default),
            out: raw.out.map(Option::unwrap_or_default),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestCase {
    description: String,
    db: String,
    query: String,
    required: bool,
    stages: OrderedMap<Stage, Option<RawStage>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBenchmarkFile {
    suite: String,
    benchmark: String,
    description: String,
    pattern: String,
    cases: OrderedMap<String, String>,
}

/// Parse a test file's contents. `commands` decides which `db` values exist.
pub fn parse_test_case(
    path: &Path,
    contents: &str,
    commands: &StageCommands,
) -> HarnessResult<TestCase> {
    let raw: RawTestCase = serde_yaml_ng::from_str(contents)
        .map_err(|e| HarnessError::malformed(path, e.to_string()))?;

    if raw.stages.0.is_empty() {
        return Err(HarnessError::malformed(path, "no stages declared"));
    }
    let needs_setup = raw.stages.0.iter().any(|(stage, _)| stage.needs_setup());
    if needs_setup && !commands.has_setup(&raw.db) {
        return Err(HarnessError::malformed(
            path,
            format!("unknown db '{}'", raw.db),
        ));
    }

    let stages = raw
        .stages
        .0
        .into_iter()
        .map(|(stage, raw_stage)| StageSpec {
            stage,
            expectation: raw_stage.unwrap_or_default().into(),
        })
        .collect();

    Ok(TestCase {
        filename: path.to_path_buf(),
        description: raw.description,
        db: raw.db,
        query: raw.query,
        required: raw.required,
        stages,
    })
}

/// Read and parse a test file.
pub fn load_test_case(path: &Path, commands: &StageCommands) -> HarnessResult<TestCase> {
    let contents = read(path)?;
    parse_test_case(path, &contents, commands)
}

/// Parse a benchmark file's contents.
pub fn parse_benchmark_file(path: &Path, contents: &str) -> HarnessResult<BenchmarkFile> {
    let raw: RawBenchmarkFile = serde_yaml_ng::from_str(contents)
        .map_err(|e| HarnessError::malformed(path, e.to_string()))?;

    let pattern = Regex::new(&raw.pattern)
        .map_err(|e| HarnessError::malformed(path, format!("invalid pattern: {e}")))?;
    if raw.cases.0.is_empty() {
        return Err(HarnessError::malformed(path, "no cases declared"));
    }

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(BenchmarkFile {
        path: path.to_path_buf(),
        name,
        suite: raw.suite,
        benchmark: raw.benchmark,
        description: raw.description,
        pattern,
        cases: raw
            .cases
            .0
            .into_iter()
            .map(|(name, query)| BenchmarkCase { name, query })
            .collect(),
    })
}

/// Read and parse a benchmark file.
pub fn load_benchmark_file(path: &Path) -> HarnessResult<BenchmarkFile> {
    let contents = read(path)?;
    parse_benchmark_file(path, &contents)
}

fn read(path: &Path) -> HarnessResult<String> {
    fs::read_to_string(path).map_err(|e| HarnessError::malformed(path, format!("unreadable: {e}")))
}

/// Files under `root` matching `pattern`, sorted. Schema files (`_*`) are skipped.
pub fn discover(root: &Path, pattern: &str) -> HarnessResult<Vec<PathBuf>> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        pattern
    );
    let entries = glob::glob(&full)
        .map_err(|e| HarnessError::malformed(root, format!("bad glob '{pattern}': {e}")))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path during discovery");
                None
            }
        })
        .filter(|path| path.is_file())
        .filter(|path| {
            !path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('_'))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Benchmark files for the given suites, or every suite when none are named.
pub fn discover_benchmarks(root: &Path, suites: &[String]) -> HarnessResult<Vec<PathBuf>> {
    if suites.is_empty() {
        return discover(root, CASE_FILE_GLOB);
    }
    let mut suites: Vec<&String> = suites.iter().collect();
    suites.sort();
    suites.dedup();

    let mut files = Vec::new();
    for suite in suites {
        files.extend(discover(&root.join(suite), CASE_FILE_GLOB)?);
    }
    Ok(files)
}
