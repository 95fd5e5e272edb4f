//! Test Case Orchestrator: runs a case's stages in declared order.
//!
//! Stage K+1 is attempted only if stage K passed. Once a stage fails, every
//! later stage is recorded as failed without spawning anything. Each declared
//! stage produces exactly one outcome and one counter update.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info_span};

use crate::cases::TestCase;
use crate::process::ProcessRunner;
use crate::stage::{Stage, StageCommands, StageOutcome, run_stage};

/// Stage timeout used when nothing else is configured.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Passed out of total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub passed: usize,
    pub total: usize,
}

impl Tally {
    pub fn record(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passed += 1;
        }
    }

    pub fn merge(&mut self, other: Tally) {
        self.passed += other.passed;
        self.total += other.total;
    }

    pub fn failed(&self) -> usize {
        self.total - self.passed
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Pass/total tallies for one harness run.
///
/// Threaded explicitly through the orchestrator; parallel workers keep their
/// own and [`Counters::merge`] them at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    stages: BTreeMap<Stage, Tally>,
    required: Tally,
    bad_files: usize,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one stage outcome of a case.
    pub fn record(&mut self, outcome: &StageOutcome, required: bool) {
        let passed = outcome.is_pass();
        self.stages.entry(outcome.stage).or_default().record(passed);
        if required {
            self.required.record(passed);
        }
    }

    pub fn record_bad_file(&mut self) {
        self.bad_files += 1;
    }

    pub fn merge(&mut self, other: &Counters) {
        for (stage, tally) in &other.stages {
            self.stages.entry(*stage).or_default().merge(*tally);
        }
        self.required.merge(other.required);
        self.bad_files += other.bad_files;
    }

    pub fn stage(&self, stage: Stage) -> Tally {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    /// Stages seen so far, in dependency order.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, Tally)> + '_ {
        self.stages.iter().map(|(stage, tally)| (*stage, *tally))
    }

    pub fn required(&self) -> Tally {
        self.required
    }

    /// Sum over every stage, required or optional.
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        for tally in self.stages.values() {
            total.merge(*tally);
        }
        total
    }

    pub fn bad_files(&self) -> usize {
        self.bad_files
    }
}

/// Drives test cases through the stage runner.
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn ProcessRunner>,
    commands: StageCommands,
    stage_timeout: Duration,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ProcessRunner>, commands: StageCommands) -> Self {
        Self {
            runner,
            commands,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn commands(&self) -> &StageCommands {
        &self.commands
    }

    /// Run every declared stage of `case`, recording each outcome in `counters`.
    pub fn run_test_case(&self, case: &TestCase, counters: &mut Counters) -> Vec<StageOutcome> {
        let _span = info_span!("test_case", file = %case.filename.display()).entered();

        let mut outcomes = Vec::with_capacity(case.stages.len());
        let mut proceed = true;

        for spec in &case.stages {
            let outcome = if proceed {
                match self.commands.command(spec.stage, &case.db) {
                    Ok(command) => {
                        run_stage(self.runner.as_ref(), case, spec, &command, self.stage_timeout)
                    }
                    Err(failure) => StageOutcome::failed(spec.stage, failure),
                }
            } else {
                StageOutcome::propagated(spec.stage)
            };
            proceed = outcome.is_pass();

            debug!(stage = %outcome.stage, passed = outcome.is_pass(), "Stage resolved");
            counters.record(&outcome, case.required);
            outcomes.push(outcome);
        }

        outcomes
    }
}
