//! One device log process per identity, fanned out to any number of
//! subscribers.
//!
//! The process's stdout lines are read by a forwarder task and published on
//! a `broadcast` channel.  A second subscriber for the same device joins the
//! running stream instead of spawning another `logcat`.  When the process
//! ends, the forwarder drops the sender and every subscriber sees the
//! channel close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use devfarm_core::{DeviceIdentity, Platform};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session_registry::KeyedGates;
use crate::error::EngineError;
use crate::infrastructure::adb::ADB;
use crate::infrastructure::simctl::XCRUN;
use crate::infrastructure::tools::{ProcessHandle, SharedRunner, SpawnMode};

/// Lines a slow subscriber may fall behind before it starts losing them.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

type SenderSlot = Arc<Mutex<Option<broadcast::Sender<String>>>>;

/// The command that tails logs for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl LogCommand {
    /// `adb -s <serial> logcat -v time -T 0`: only lines from now on.
    pub fn android(serial: &str) -> Self {
        Self {
            program: ADB,
            args: ["-s", serial, "logcat", "-v", "time", "-T", "0"]
                .map(String::from)
                .to_vec(),
        }
    }

    /// `xcrun simctl spawn <udid> log stream --style compact`.
    pub fn ios(udid: &str) -> Self {
        Self {
            program: XCRUN,
            args: ["simctl", "spawn", udid, "log", "stream", "--style", "compact"]
                .map(String::from)
                .to_vec(),
        }
    }

    pub fn platform_of(&self) -> Platform {
        if self.program == ADB {
            Platform::Android
        } else {
            Platform::Ios
        }
    }
}

struct LogStream {
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    sender: SenderSlot,
    forwarder: JoinHandle<()>,
}

impl LogStream {
    fn is_alive(&self) -> bool {
        if self.forwarder.is_finished() {
            return false;
        }
        let sender_open = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let running = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .is_some_and(|p| p.is_running());
        sender_open && running
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    async fn stop(self) {
        self.forwarder.abort();
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        let process = self.process.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut process) = process {
            process.terminate().await;
        }
    }
}

/// At most one live log process per device.
pub struct LogStreamRegistry {
    runner: SharedRunner,
    streams: Mutex<HashMap<DeviceIdentity, LogStream>>,
    gates: KeyedGates,
}

impl LogStreamRegistry {
    pub fn new(runner: SharedRunner) -> Self {
        Self {
            runner,
            streams: Mutex::new(HashMap::new()),
            gates: KeyedGates::new(),
        }
    }

    /// Subscribes to the log stream for `identity`, spawning `command` if
    /// no live stream exists.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MissingDependency`] when the log tool is absent.
    /// - [`EngineError::Command`] when the process exposes no stdout.
    pub async fn subscribe(
        &self,
        identity: &DeviceIdentity,
        command: &LogCommand,
    ) -> Result<broadcast::Receiver<String>, EngineError> {
        let _gate = self.gates.lock(identity).await;

        let existing = self.take(identity);
        if let Some(stream) = existing {
            if stream.is_alive() {
                if let Some(rx) = stream.subscribe() {
                    debug!(device = %identity, "joining running log stream");
                    self.insert(identity, stream);
                    return Ok(rx);
                }
            }
            debug!(device = %identity, "log stream ended, restarting");
            stream.stop().await;
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let mut process = self
            .runner
            .spawn(command.program, &args, SpawnMode::PipeStdout)
            .await?;
        let Some(mut lines) = process.take_output_lines() else {
            process.terminate().await;
            return Err(EngineError::Command {
                program: command.program.to_string(),
                stderr: "log process has no stdout".into(),
            });
        };

        let (tx, rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let sender: SenderSlot = Arc::new(Mutex::new(Some(tx)));
        let forwarder = {
            let sender = Arc::clone(&sender);
            let device = identity.clone();
            tokio::spawn(async move {
                let mut forwarded = 0u64;
                while let Some(line) = lines.recv().await {
                    let slot = sender.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(tx) = slot.as_ref() else { break };
                    // No subscribers is not an error; lines are simply dropped.
                    let _ = tx.send(line);
                    forwarded += 1;
                }
                sender.lock().unwrap_or_else(PoisonError::into_inner).take();
                debug!(device = %device, forwarded, "log forwarder finished");
            })
        };

        info!(device = %identity, program = command.program, "log stream started");
        self.insert(
            identity,
            LogStream {
                process: Mutex::new(Some(process)),
                sender,
                forwarder,
            },
        );
        Ok(rx)
    }

    /// Terminates the log process for `identity`.  Returns `false` when
    /// none was running.
    pub async fn stop(&self, identity: &DeviceIdentity) -> bool {
        let _gate = self.gates.lock(identity).await;
        match self.take(identity) {
            Some(stream) => {
                stream.stop().await;
                info!(device = %identity, "log stream stopped");
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let identities: Vec<DeviceIdentity> = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for identity in identities {
            self.stop(&identity).await;
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, identity: &DeviceIdentity) -> Option<LogStream> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    fn insert(&self, identity: &DeviceIdentity, stream: LogStream) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.clone(), stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::tools::mock::{ok, MockToolRunner};
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn registry(runner: MockToolRunner) -> (LogStreamRegistry, Arc<MockToolRunner>) {
        let runner = Arc::new(runner);
        (LogStreamRegistry::new(runner.clone()), runner)
    }

    async fn recv(rx: &mut broadcast::Receiver<String>) -> Result<String, RecvError> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap_or(Err(RecvError::Closed))
    }

    #[test]
    fn test_android_log_command_tails_from_now() {
        let cmd = LogCommand::android("emulator-5554");
        assert_eq!(cmd.program, "adb");
        assert_eq!(cmd.args.join(" "), "-s emulator-5554 logcat -v time -T 0");
        assert_eq!(cmd.platform_of(), Platform::Android);
    }

    #[test]
    fn test_ios_log_command_uses_compact_style() {
        let cmd = LogCommand::ios("U1");
        assert_eq!(cmd.args.join(" "), "simctl spawn U1 log stream --style compact");
        assert_eq!(cmd.platform_of(), Platform::Ios);
    }

    #[tokio::test]
    async fn test_subscriber_receives_process_lines() {
        // Arrange
        let runner =
            MockToolRunner::new(|_, _| ok("")).with_process_lines(&["boot ok", "launcher up"]);
        let (reg, _) = registry(runner);
        let id = DeviceIdentity::android("Pixel_7");

        // Act
        let mut rx = reg.subscribe(&id, &LogCommand::android("emulator-5554")).await.unwrap();

        // Assert
        assert_eq!(recv(&mut rx).await.unwrap(), "boot ok");
        assert_eq!(recv(&mut rx).await.unwrap(), "launcher up");
    }

    #[tokio::test]
    async fn test_second_subscriber_joins_running_stream() {
        let (reg, runner) = registry(MockToolRunner::new(|_, _| ok("")));
        let id = DeviceIdentity::android("Pixel_7");
        let cmd = LogCommand::android("emulator-5554");

        let _a = reg.subscribe(&id, &cmd).await.unwrap();
        let _b = reg.subscribe(&id, &cmd).await.unwrap();

        assert_eq!(runner.spawn_count(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_dead_process_is_respawned() {
        let (reg, runner) = registry(MockToolRunner::new(|_, _| ok("")));
        let id = DeviceIdentity::ios("U1");
        let cmd = LogCommand::ios("U1");

        let _a = reg.subscribe(&id, &cmd).await.unwrap();
        runner.kill_all();
        let _b = reg.subscribe(&id, &cmd).await.unwrap();

        assert_eq!(runner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_closes_subscribers_and_is_idempotent() {
        let (reg, runner) = registry(MockToolRunner::new(|_, _| ok("")));
        let id = DeviceIdentity::android("Pixel_7");
        let mut rx = reg.subscribe(&id, &LogCommand::android("emulator-5554")).await.unwrap();

        assert!(reg.stop(&id).await);
        assert!(!reg.stop(&id).await);

        assert_eq!(recv(&mut rx).await, Err(RecvError::Closed));
        assert_eq!(runner.running_processes(), 0);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_missing_log_tool_is_reported() {
        let (reg, _) = registry(MockToolRunner::new(|_, _| ok("")).without_tool("xcrun"));
        let err = reg
            .subscribe(&DeviceIdentity::ios("U1"), &LogCommand::ios("U1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingDependency { .. }));
    }
}
