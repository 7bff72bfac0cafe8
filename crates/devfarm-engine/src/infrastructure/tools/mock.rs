//! Scripted tool runner for unit and integration tests.
//!
//! # Why a mock runner?
//!
//! The real runner needs an Android SDK, Xcode, and running devices.  The
//! `MockToolRunner` answers every command from a closure and records what
//! was asked, so tests can assert on the exact `adb` invocations and drive
//! state changes ("the emulator shows up on the third poll") from the
//! closure.
//!
//! # Usage in tests
//!
//! ```ignore
//! let runner = MockToolRunner::new(|program, args| match args.first().map(String::as_str) {
//!     Some("devices") => ok("List of devices attached\nemulator-5554\tdevice\n"),
//!     _ => ok(""),
//! });
//! // ... drive the code under test ...
//! assert_eq!(runner.calls_matching("devices"), 1);
//! ```
//!
//! Spawned processes are [`FakeProcess`] values that stay "running" until
//! terminated or until a test calls [`MockToolRunner::kill_all`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ProcessHandle, SpawnMode, ToolOutput, ToolRunner};
use crate::error::EngineError;

type Responder = Box<dyn Fn(&str, &[String]) -> ToolOutput + Send + Sync>;
type SpawnHook = Box<dyn Fn(&str, &[String]) + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
}

impl RecordedCall {
    /// `program arg1 arg2 ...`
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Successful output with `stdout` as text.
pub fn ok(stdout: &str) -> ToolOutput {
    ToolOutput {
        success: true,
        stdout: stdout.as_bytes().to_vec(),
        stderr: String::new(),
    }
}

/// Successful output with binary stdout.
pub fn ok_bytes(stdout: Vec<u8>) -> ToolOutput {
    ToolOutput {
        success: true,
        stdout,
        stderr: String::new(),
    }
}

/// Failed output carrying `stderr`.
pub fn fail(stderr: &str) -> ToolOutput {
    ToolOutput {
        success: false,
        stdout: Vec::new(),
        stderr: stderr.to_string(),
    }
}

/// A tool runner that never touches the OS.
pub struct MockToolRunner {
    responder: Responder,
    spawn_hook: Option<SpawnHook>,
    /// Every `run` call, in order.
    pub calls: Mutex<Vec<RecordedCall>>,
    /// Every `spawn` call, in order.
    pub spawns: Mutex<Vec<RecordedCall>>,
    unavailable: Mutex<Vec<String>>,
    process_stderr: String,
    process_lines: Vec<String>,
    run_delay: Option<Duration>,
    processes: Mutex<Vec<Arc<AtomicBool>>>,
    next_pid: AtomicU32,
}

impl MockToolRunner {
    /// Creates a runner that answers each `run` with `responder`.
    pub fn new(responder: impl Fn(&str, &[String]) -> ToolOutput + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            spawn_hook: None,
            calls: Mutex::new(Vec::new()),
            spawns: Mutex::new(Vec::new()),
            unavailable: Mutex::new(Vec::new()),
            process_stderr: String::new(),
            process_lines: Vec::new(),
            run_delay: None,
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(4000),
        }
    }

    /// Calls `hook` on every `spawn`, before the fake process is returned.
    pub fn with_spawn_hook(
        mut self,
        hook: impl Fn(&str, &[String]) + Send + Sync + 'static,
    ) -> Self {
        self.spawn_hook = Some(Box::new(hook));
        self
    }

    /// Makes `tool` report as not installed.
    pub fn without_tool(self, tool: &str) -> Self {
        if let Ok(mut list) = self.unavailable.lock() {
            list.push(tool.to_string());
        }
        self
    }

    /// Stderr every spawned process reports.
    pub fn with_process_stderr(mut self, stderr: &str) -> Self {
        self.process_stderr = stderr.to_string();
        self
    }

    /// Stdout lines every spawned process emits.
    pub fn with_process_lines(mut self, lines: &[&str]) -> Self {
        self.process_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Delays every `run`, to widen race windows in concurrency tests.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// Number of `run` calls whose command line contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.command_line().contains(needle)).count())
            .unwrap_or(0)
    }

    /// Number of `spawn` calls.
    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Number of spawned processes still "running".
    pub fn running_processes(&self) -> usize {
        self.processes
            .lock()
            .map(|p| p.iter().filter(|f| f.load(Ordering::SeqCst)).count())
            .unwrap_or(0)
    }

    /// Simulates every spawned process dying.
    pub fn kill_all(&self) {
        if let Ok(procs) = self.processes.lock() {
            for flag in procs.iter() {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn record(program: &str, args: &[&str]) -> RecordedCall {
    RecordedCall {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    fn is_available(&self, tool: &str) -> bool {
        self.unavailable
            .lock()
            .map(|list| !list.iter().any(|t| t == tool))
            .unwrap_or(true)
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Option<Duration>,
    ) -> Result<ToolOutput, EngineError> {
        self.ensure_available(program)?;
        let call = record(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        Ok((self.responder)(program, &call.args))
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[&str],
        _mode: SpawnMode,
    ) -> Result<Box<dyn ProcessHandle>, EngineError> {
        self.ensure_available(program)?;
        let call = record(program, args);
        if let Ok(mut spawns) = self.spawns.lock() {
            spawns.push(call.clone());
        }
        if let Some(hook) = &self.spawn_hook {
            hook(program, &call.args);
        }
        let running = Arc::new(AtomicBool::new(true));
        if let Ok(mut procs) = self.processes.lock() {
            procs.push(Arc::clone(&running));
        }
        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            running,
            stderr: self.process_stderr.clone(),
            lines: Some(self.process_lines.clone()),
            line_tx: None,
        }))
    }
}

/// A process that exists only as a flag.
pub struct FakeProcess {
    pid: u32,
    running: Arc<AtomicBool>,
    stderr: String,
    lines: Option<Vec<String>>,
    /// Keeps the output channel open until the process is terminated.
    line_tx: Option<mpsc::Sender<String>>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_running(&mut self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.line_tx = None;
    }

    fn stderr_output(&self) -> String {
        self.stderr.clone()
    }

    fn take_output_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        let lines = self.lines.take()?;
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            // Capacity covers every line, so this never fails.
            let _ = tx.try_send(line);
        }
        self.line_tx = Some(tx);
        Some(rx)
    }
}
