//! Bounded subprocess execution.
//!
//! Every interaction with the system under test goes through
//! [`ProcessRunner::run`]: spawn the binary in the invocation root, feed the
//! payload on stdin and close it, drain stdout and stderr, and enforce a hard
//! wall-clock deadline. On expiry the child is killed and reaped before the
//! call returns, so no invocation outlives its own call. Pipes held open by
//! processes the SUT left behind are waited on only until the same deadline.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// How long to wait for output readers after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(200);

/// An executable plus its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SutCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl SutCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Append arguments, returning the extended command.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for SutCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured behavior of one completed invocation.
///
/// Streams are kept as raw bytes; callers pick the decoding they need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    wall_time: Option<Duration>,
}

impl ProcessResult {
    pub fn new(exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            wall_time: None,
        }
    }

    #[must_use]
    pub fn with_wall_time(mut self, wall_time: Duration) -> Self {
        self.wall_time = Some(wall_time);
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr
    }

    pub fn wall_time(&self) -> Option<Duration> {
        self.wall_time
    }

    /// Stdout decoded one byte per character; never fails.
    pub fn stdout_latin1(&self) -> String {
        decode_latin1(&self.stdout)
    }

    /// Stderr decoded one byte per character; never fails.
    pub fn stderr_latin1(&self) -> String {
        decode_latin1(&self.stderr)
    }

    /// Exit code zero and nothing written to stderr.
    pub fn is_clean(&self) -> bool {
        self.exit_code == 0 && self.stderr.is_empty()
    }
}

/// Payload bytes: ISO-8859-1 when every character fits in one byte,
/// UTF-8 otherwise.
pub fn encode_payload(input: &str) -> Vec<u8> {
    if input.chars().all(|c| u32::from(c) <= 0xff) {
        input.chars().map(|c| c as u8).collect()
    } else {
        input.as_bytes().to_vec()
    }
}

/// Map every byte to the code point of the same value (ISO-8859-1).
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Launches a command, feeds it input and collects its result under a deadline.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        command: &SutCommand,
        input: &str,
        timeout: Duration,
    ) -> HarnessResult<ProcessResult>;
}

/// [`ProcessRunner`] backed by real OS processes.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    working_dir: PathBuf,
    poll_interval: Duration,
}

impl SubprocessRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            poll_interval: Duration::from_millis(5),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn spawn(&self, command: &SutCommand) -> HarnessResult<Child> {
        Command::new(command.program())
            .args(command.args())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: command.program().display().to_string(),
                source,
            })
    }
}

impl ProcessRunner for SubprocessRunner {
    fn run(
        &self,
        command: &SutCommand,
        input: &str,
        timeout: Duration,
    ) -> HarnessResult<ProcessResult> {
        debug!(command = %command, timeout = ?timeout, input_len = input.len(), "Spawning SUT");

        let start = Instant::now();
        let mut child = self.spawn(command)?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|mut stdout| thread::spawn(move || read_to_end(&mut stdout)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|mut stderr| thread::spawn(move || read_to_end(&mut stderr)));
        let mut stdin_handle = child.stdin.take().map(|mut stdin| {
            let payload = encode_payload(input);
            // Dropping stdin at the end of the closure signals end-of-input.
            thread::spawn(move || stdin.write_all(&payload))
        });

        let status = loop {
            if stdin_handle.as_ref().is_some_and(JoinHandle::is_finished)
                && let Some(handle) = stdin_handle.take()
                && let Err(err) = join_writer(handle)
            {
                warn!(command = %command, error = %err, "Writing SUT input failed");
                kill_and_reap(&mut child);
                discard_output(stdout_handle, stderr_handle);
                return Err(HarnessError::StdinWrite(err));
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child);
                    discard_output(stdout_handle, stderr_handle);
                    return Err(HarnessError::Io(err));
                }
            }

            if start.elapsed() >= timeout {
                warn!(command = %command, timeout = ?timeout, "SUT timed out; killing process");
                kill_and_reap(&mut child);
                discard_output(stdout_handle, stderr_handle);
                return Err(HarnessError::Timeout(timeout));
            }

            thread::sleep(self.poll_interval);
        };

        // The child is gone, but a process it left behind may still hold
        // the pipes. Waiting on them stays bounded by the same deadline.
        let deadline = start + timeout;
        if let Some(handle) = stdin_handle {
            if !wait_until(&handle, deadline, self.poll_interval) {
                warn!(command = %command, timeout = ?timeout, "SUT input pipe still open at deadline");
                discard_output(stdout_handle, stderr_handle);
                return Err(HarnessError::Timeout(timeout));
            }
            if let Err(err) = join_writer(handle) {
                discard_output(stdout_handle, stderr_handle);
                return Err(HarnessError::StdinWrite(err));
            }
        }

        let stdout = join_output_until(stdout_handle, deadline, self.poll_interval);
        let stderr = join_output_until(stderr_handle, deadline, self.poll_interval);
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            warn!(command = %command, timeout = ?timeout, "SUT output pipes still open at deadline");
            return Err(HarnessError::Timeout(timeout));
        };
        let wall_time = start.elapsed();
        let result = ProcessResult::new(exit_code(status), stdout, stderr).with_wall_time(wall_time);

        debug!(
            command = %command,
            exit_code = result.exit_code(),
            duration_ms = wall_time.as_millis() as u64,
            stdout_len_bytes = result.stdout_bytes().len(),
            stderr_len_bytes = result.stderr_bytes().len(),
            "SUT finished"
        );

        Ok(result)
    }
}

fn read_to_end<R: Read>(reader: &mut R) -> Vec<u8> {
    let mut buffer = Vec::new();
    // A read error mid-stream keeps whatever arrived before it.
    let _ = reader.read_to_end(&mut buffer);
    buffer
}

/// Join the stdin writer. A closed pipe means the SUT stopped reading, which
/// is its own business and not a harness failure.
fn join_writer(handle: JoinHandle<io::Result<()>>) -> io::Result<()> {
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(io::Error::other("stdin writer thread panicked")),
    }
}

/// Poll until `handle` finishes or `deadline` passes. True if it finished.
fn wait_until<T>(handle: &JoinHandle<T>, deadline: Instant, poll_interval: Duration) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(poll_interval);
    }
    true
}

/// Collect a reader's output, or `None` if its pipe is still open at
/// `deadline`. An unfinished reader is detached.
fn join_output_until(
    handle: Option<JoinHandle<Vec<u8>>>,
    deadline: Instant,
    poll_interval: Duration,
) -> Option<Vec<u8>> {
    let Some(handle) = handle else {
        return Some(Vec::new());
    };
    if wait_until(&handle, deadline, poll_interval) {
        Some(handle.join().unwrap_or_default())
    } else {
        None
    }
}

/// Wait briefly for readers of an abandoned invocation. A grandchild that
/// inherited the pipes can keep them open indefinitely; such readers are
/// detached rather than joined.
fn discard_output(stdout: Option<JoinHandle<Vec<u8>>>, stderr: Option<JoinHandle<Vec<u8>>>) {
    let deadline = Instant::now() + READER_GRACE;
    for handle in [stdout, stderr].into_iter().flatten() {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "kill failed (process already exited?)");
    }
    if let Err(err) = child.wait() {
        warn!(error = %err, "Failed to reap SUT process");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
