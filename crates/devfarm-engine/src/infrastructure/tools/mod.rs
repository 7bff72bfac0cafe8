//! Running host tools (`adb`, `emulator`, `xcrun`, `idb`).
//!
//! Everything the engine does to a device goes through a [`ToolRunner`].  The
//! production [`SystemToolRunner`] shells out with `tokio::process`; tests use
//! [`mock::MockToolRunner`] to script answers and record calls.
//!
//! # Why a trait here? (for beginners)
//!
//! Emulators and simulators are slow, heavy, and not available on CI
//! machines.  Putting the process boundary behind a trait lets the session
//! logic above it be tested with canned `adb devices` output instead of a
//! real Android SDK.

pub mod mock;

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Lines buffered between a log process and its reader.
const LINE_CHANNEL_CAPACITY: usize = 512;

/// Upper bound on stderr kept from a companion process.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// How long `terminate` waits for a process to exit after the kill signal.
const TERMINATE_WAIT: Duration = Duration::from_secs(2);

/// How long `terminate` waits for the stderr reader to hit end of file.
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Converts a failed run into [`EngineError::Command`].
    pub fn require_success(self, program: &str) -> Result<Self, EngineError> {
        if self.success {
            Ok(self)
        } else {
            Err(EngineError::Command {
                program: program.to_string(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// How a long-running child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// All streams to null; the child outlives the handle.
    Detached,
    /// Stderr collected for diagnostics; killed when the handle drops.
    CaptureStderr,
    /// Stdout delivered line by line; killed when the handle drops.
    PipeStdout,
}

/// A spawned child process.
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// `true` until the process has exited.
    fn is_running(&mut self) -> bool;

    /// Kills the process and reaps it.  Safe to call more than once.
    async fn terminate(&mut self);

    /// Collected stderr, for [`SpawnMode::CaptureStderr`] children.
    fn stderr_output(&self) -> String;

    /// The stdout line stream, for [`SpawnMode::PipeStdout`] children.
    /// Returns `None` after the first call.
    fn take_output_lines(&mut self) -> Option<mpsc::Receiver<String>>;
}

/// Runs host tools.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Whether `tool` can be executed.
    fn is_available(&self, tool: &str) -> bool;

    /// Runs `program` to completion.  A `timeout` kills it when exceeded.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, EngineError>;

    /// Starts `program` without waiting for it.
    async fn spawn(
        &self,
        program: &str,
        args: &[&str],
        mode: SpawnMode,
    ) -> Result<Box<dyn ProcessHandle>, EngineError>;

    /// Fails with [`EngineError::MissingDependency`] when `tool` is absent.
    fn ensure_available(&self, tool: &str) -> Result<(), EngineError> {
        if self.is_available(tool) {
            Ok(())
        } else {
            Err(EngineError::missing(tool))
        }
    }
}

/// Shared handle to a runner.
pub type SharedRunner = Arc<dyn ToolRunner>;

// ── Production implementation ─────────────────────────────────────────────────

/// Runs real binaries found on `PATH`.
#[derive(Debug, Default, Clone)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    fn is_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, EngineError> {
        self.ensure_available(program)?;
        debug!(program, ?args, "running tool");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| EngineError::Command {
                    program: program.to_string(),
                    stderr: format!("timed out after {limit:?}"),
                })??,
            None => cmd.output().await?,
        };

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[&str],
        mode: SpawnMode,
    ) -> Result<Box<dyn ProcessHandle>, EngineError> {
        self.ensure_available(program)?;
        debug!(program, ?args, ?mode, "spawning tool");
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        match mode {
            SpawnMode::Detached => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(false);
            }
            SpawnMode::CaptureStderr => {
                cmd.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);
            }
            SpawnMode::PipeStdout => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);
            }
        }
        let mut child = cmd.spawn()?;

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let stderr_task = child.stderr.take().map(|mut stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let Ok(mut buf) = tail.lock() else { break };
                            buf.extend_from_slice(&chunk[..n]);
                            if buf.len() > STDERR_TAIL_BYTES {
                                let excess = buf.len() - STDERR_TAIL_BYTES;
                                buf.drain(..excess);
                            }
                        }
                    }
                }
            })
        });

        let lines = child.stdout.take().map(|stdout| {
            let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
            rx
        });

        Ok(Box::new(SystemProcess {
            program: program.to_string(),
            child,
            stderr_tail,
            stderr_task,
            lines,
        }))
    }
}

struct SystemProcess {
    program: String,
    child: Child,
    stderr_tail: Arc<Mutex<Vec<u8>>>,
    stderr_task: Option<JoinHandle<()>>,
    lines: Option<mpsc::Receiver<String>>,
}

impl SystemProcess {
    /// Lets the stderr reader collect what the exited process left in the
    /// pipe.
    async fn drain_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_WAIT, task).await.is_err() {
                debug!(program = %self.program, "stderr still open after exit");
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        if self.is_running() {
            if let Err(e) = self.child.start_kill() {
                warn!(program = %self.program, error = %e, "kill failed");
                return;
            }
            if tokio::time::timeout(TERMINATE_WAIT, self.child.wait())
                .await
                .is_err()
            {
                warn!(program = %self.program, "process did not exit after kill");
                return;
            }
        }
        self.drain_stderr().await;
    }

    fn stderr_output(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    fn take_output_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.lines.take()
    }
}

/// Converts borrowed strings into the `&[&str]` shape [`ToolRunner`] takes.
pub(crate) fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_success_maps_failure_to_command_error() {
        let out = ToolOutput {
            success: false,
            stdout: vec![],
            stderr: "  error: device offline\n".to_string(),
        };
        match out.require_success("adb") {
            Err(EngineError::Command { program, stderr }) => {
                assert_eq!(program, "adb");
                assert_eq!(stderr, "error: device offline");
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_missing_dependency() {
        let runner = SystemToolRunner::new();
        let err = runner
            .run("devfarm-no-such-tool-xyz", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingDependency { tool } if tool == "devfarm-no-such-tool-xyz"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = SystemToolRunner::new();
        let out = runner.run("echo", &["hello"], None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout_text().trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_collects_complete_stderr() {
        // Arrange: a process that writes to stderr and exits on its own
        let runner = SystemToolRunner::new();
        let mut proc = runner
            .spawn("sh", &["-c", "echo 'bind failed' >&2; exit 3"], SpawnMode::CaptureStderr)
            .await
            .unwrap();
        for _ in 0..200 {
            if !proc.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Act
        proc.terminate().await;

        // Assert
        assert_eq!(proc.stderr_output().trim(), "bind failed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_piped_stdout_arrives_line_by_line() {
        let runner = SystemToolRunner::new();
        let mut proc = runner
            .spawn("printf", &["a\\nb\\n"], SpawnMode::PipeStdout)
            .await
            .unwrap();
        let mut lines = proc.take_output_lines().unwrap();
        assert_eq!(lines.recv().await.as_deref(), Some("a"));
        assert_eq!(lines.recv().await.as_deref(), Some("b"));
        assert!(proc.take_output_lines().is_none());
    }
}
