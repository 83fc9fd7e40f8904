//! Interactive command execution.
//!
//! Commands run through the shell with stdin and stdout attached to the
//! terminal, so prompts raised by the command itself (sudo passwords, `[Y/n]`
//! questions) reach the user. Stderr is teed: it still appears live on the
//! terminal while a bounded tail is kept for failure matching.

use io_tee::TeeReader;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{error, info, warn};

/// Exit code reported when the command could not be launched at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

/// Outcome of one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Last bytes written to stderr, or the launch error.
    pub stderr_tail: String,
    /// False only when the command never started.
    pub stdout_was_streamed: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    fn launch_failure(message: String) -> Self {
        Self {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            stderr_tail: message,
            stdout_was_streamed: false,
        }
    }
}

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running system processes.
///
/// This abstraction enables testing without spawning real processes.
pub trait ProcessRunner: Send + Sync {
    /// Runs a program with inherited stdin/stdout, copying its stderr into
    /// `stderr_sink` as it arrives.
    fn run_streaming(&self, program: &str, args: &[&str], stderr_sink: &mut dyn Write) -> io::Result<ExitStatus>;

    /// Checks if a program exists in PATH.
    fn program_exists(&self, program: &str) -> bool;
}

/// Default process runner using std::process::Command.
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run_streaming(&self, program: &str, args: &[&str], stderr_sink: &mut dyn Write) -> io::Result<ExitStatus> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let mut tee = TeeReader::new(stderr, io::stderr());
            if let Err(e) = io::copy(&mut tee, stderr_sink) {
                warn!("Lost part of the command's stderr: {}", e);
            }
        }

        child.wait()
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Keeps only the last `capacity` bytes written to it.
#[derive(Debug)]
pub struct TailBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    pub fn contents(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut joined = Vec::with_capacity(self.bytes.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        String::from_utf8_lossy(&joined).into_owned()
    }
}

impl Write for TailBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.capacity == 0 {
            return Ok(buf.len());
        }
        let keep = &buf[buf.len().saturating_sub(self.capacity)..];
        let overflow = (self.bytes.len() + keep.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(keep);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// Runs confirmed commands through the shell.
///
/// # Example
///
/// ```no_run
/// use llama_term::executor::InteractiveExecutor;
///
/// let executor = InteractiveExecutor::new("sh", 4096);
/// let result = executor.run("ls -la");
/// println!("exit code {}", result.exit_code);
/// ```
pub struct InteractiveExecutor {
    runner: Box<dyn ProcessRunner>,
    shell: String,
    tail_bytes: usize,
}

impl InteractiveExecutor {
    pub fn new(shell: impl Into<String>, tail_bytes: usize) -> Self {
        Self::with_runner(Box::new(SystemProcessRunner), shell, tail_bytes)
    }

    /// Creates an executor with an injected runner (for testing).
    pub fn with_runner(runner: Box<dyn ProcessRunner>, shell: impl Into<String>, tail_bytes: usize) -> Self {
        Self {
            runner,
            shell: shell.into(),
            tail_bytes,
        }
    }

    /// Runs `command` as `<shell> -c <command>`.
    ///
    /// Never fails: launch errors come back as [`LAUNCH_FAILURE_EXIT_CODE`]
    /// with the error text in `stderr_tail`.
    pub fn run(&self, command: &str) -> ExecutionResult {
        info!("Executing: {}", command);

        if !self.runner.program_exists(&self.shell) {
            error!("Shell '{}' not found in PATH", self.shell);
            return ExecutionResult::launch_failure(format!("shell '{}' not found in PATH", self.shell));
        }

        let mut tail = TailBuffer::new(self.tail_bytes);
        match self.runner.run_streaming(&self.shell, &["-c", command], &mut tail) {
            Ok(status) => {
                let exit_code = exit_code_of(status);
                info!("Command exited with {}", exit_code);
                ExecutionResult {
                    exit_code,
                    stderr_tail: tail.contents(),
                    stdout_was_streamed: true,
                }
            }
            Err(e) => {
                error!("Failed to launch '{}': {}", command, e);
                ExecutionResult::launch_failure(format!("failed to launch command: {}", e))
            }
        }
    }
}

/// Exit code, or `128 + signal` for a child killed by a signal.
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => LAUNCH_FAILURE_EXIT_CODE,
    }
}
