//! Scripted stand-in for the system under test.
//!
//! [`ScriptedRunner`] implements [`ProcessRunner`] without spawning anything.
//! It answers from canned responses and records every invocation, which lets
//! tests assert on what would have been launched (and what would not).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::process::{ProcessResult, ProcessRunner, SutCommand};

/// What a scripted invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Complete(ProcessResult),
    Timeout,
    SpawnFailure,
}

impl Scripted {
    /// Exit 0 with the given stdout and empty stderr.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self::Complete(ProcessResult::new(0, stdout, ""))
    }

    pub fn exit(exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self::Complete(ProcessResult::new(exit_code, stdout, stderr))
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: SutCommand,
    pub input: String,
    pub timeout: Duration,
}

type Responder = Arc<dyn Fn(&SutCommand, &str) -> Scripted + Send + Sync>;

/// Deterministic [`ProcessRunner`] for tests.
///
/// Resolution order per call: queued responses (FIFO), then responses keyed
/// by the program's file name, then the responder closure, then the default
/// (exit 0, no output).
#[derive(Default)]
pub struct ScriptedRunner {
    queue: Mutex<VecDeque<Scripted>>,
    by_program: HashMap<String, Scripted>,
    responder: Option<Responder>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to a program with this file name (e.g. `"parse"`).
    #[must_use]
    pub fn on_program(mut self, program: &str, response: Scripted) -> Self {
        self.by_program.insert(program.to_string(), response);
        self
    }

    /// Compute responses from the command and its input.
    #[must_use]
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&SutCommand, &str) -> Scripted + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Queue a one-shot response ahead of everything else.
    pub fn push(&self, response: Scripted) {
        lock(&self.queue).push_back(response);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn resolve(&self, command: &SutCommand, input: &str) -> Scripted {
        if let Some(response) = lock(&self.queue).pop_front() {
            return response;
        }
        let program = command
            .program()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(response) = self.by_program.get(&program) {
            return response.clone();
        }
        if let Some(responder) = &self.responder {
            return responder(command, input);
        }
        Scripted::ok("")
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        command: &SutCommand,
        input: &str,
        timeout: Duration,
    ) -> HarnessResult<ProcessResult> {
        lock(&self.calls).push(Invocation {
            command: command.clone(),
            input: input.to_string(),
            timeout,
        });

        match self.resolve(command, input) {
            Scripted::Complete(result) => Ok(result),
            Scripted::Timeout => Err(HarnessError::Timeout(timeout)),
            Scripted::SpawnFailure => Err(HarnessError::Spawn {
                program: command.program().display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
        }
    }
}

/// A poisoned lock only means another test thread panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
