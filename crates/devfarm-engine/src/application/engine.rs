//! The streaming engine: one entry point for every device operation.
//!
//! Callers address devices by [`DeviceIdentity`]; the engine routes each call
//! to the Android or iOS manager and owns the log-stream table.

use std::path::Path;
use std::sync::Arc;

use devfarm_core::{DeviceIdentity, InputEvent, KeyAction, Platform, TouchAction};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::android_manager::{AndroidDeviceManager, AvdMapping};
use super::device_stream::{DeviceStream, FrameSink, InputSource};
use super::ios_manager::IosDeviceManager;
use super::log_streams::{LogCommand, LogStreamRegistry};
use super::orchestrator::{apply_input, run_connection, ConnectionOutcome};
use super::session_registry::SessionHandle;
use crate::domain::config::EngineConfig;
use crate::error::EngineError;
use crate::infrastructure::adb::{ADB, EMULATOR};
use crate::infrastructure::simctl::{IDB, XCRUN};
use crate::infrastructure::tools::{SharedRunner, SystemToolRunner};

/// Host tools the engine may need, in the order the startup scan reports them.
pub const HOST_TOOLS: [&str; 4] = [ADB, EMULATOR, XCRUN, IDB];

/// What [`StreamingEngine::startup_scan`] found.
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub missing_tools: Vec<&'static str>,
    /// `None` when `adb` could not be queried.
    pub avd_mapping: Option<AvdMapping>,
}

pub struct StreamingEngine {
    runner: SharedRunner,
    android: AndroidDeviceManager,
    ios: IosDeviceManager,
    logs: LogStreamRegistry,
}

impl StreamingEngine {
    pub fn new(runner: SharedRunner, config: EngineConfig) -> Self {
        Self {
            android: AndroidDeviceManager::new(runner.clone(), config.android, config.scrcpy),
            ios: IosDeviceManager::new(runner.clone(), config.ios),
            logs: LogStreamRegistry::new(runner.clone()),
            runner,
        }
    }

    /// An engine that runs the real host tools.
    pub fn with_system_tools(config: EngineConfig) -> Self {
        Self::new(Arc::new(SystemToolRunner::new()), config)
    }

    pub fn android(&self) -> &AndroidDeviceManager {
        &self.android
    }

    pub fn ios(&self) -> &IosDeviceManager {
        &self.ios
    }

    /// Starts (or reuses) the stream for `identity`.
    pub async fn start(&self, identity: &DeviceIdentity) -> Result<SessionHandle, EngineError> {
        match identity.platform {
            Platform::Android => self.android.start_stream(&identity.name).await,
            Platform::Ios => self.ios.start_stream(&identity.name).await,
        }
    }

    /// Stops the stream for `identity`.  Returns `false` if none was running.
    pub async fn stop(&self, identity: &DeviceIdentity) -> bool {
        match identity.platform {
            Platform::Android => self.android.stop_stream(&identity.name).await,
            Platform::Ios => self.ios.stop_stream(&identity.name).await,
        }
    }

    /// The registered stream for `identity`, if any.
    pub fn session(&self, identity: &DeviceIdentity) -> Option<Arc<dyn DeviceStream>> {
        match identity.platform {
            Platform::Android => self.android.sessions().get(identity),
            Platform::Ios => self.ios.sessions().get(identity),
        }
    }

    /// Runs one client connection against `identity` until either side ends.
    ///
    /// If the device cannot be started, the sink receives exactly one error
    /// message and is closed.  When the connection ends the device's stream
    /// is stopped.
    pub async fn attach_connection(
        &self,
        identity: &DeviceIdentity,
        sink: Arc<dyn FrameSink>,
        input: Box<dyn InputSource>,
    ) -> ConnectionOutcome {
        let handle = match self.start(identity).await {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                warn!(device = %identity, %reason, "attach failed");
                if let Err(send_err) = sink.send_error(&reason).await {
                    warn!(device = %identity, error = %send_err, "could not report attach failure");
                }
                sink.close().await;
                return ConnectionOutcome::Error { reason };
            }
        };

        let outcome = run_connection(Arc::clone(&handle.stream), sink, input).await;
        self.stop(identity).await;
        outcome
    }

    /// Best-effort input to a running stream.  No-op when none is running.
    pub async fn inject(&self, identity: &DeviceIdentity, event: InputEvent) {
        match self.session(identity) {
            Some(stream) => apply_input(stream.as_ref(), event).await,
            None => debug!(device = %identity, ?event, "no session, input dropped"),
        }
    }

    pub async fn inject_touch(
        &self,
        identity: &DeviceIdentity,
        action: TouchAction,
        x: f64,
        y: f64,
    ) {
        self.inject(identity, InputEvent::Touch { action, x, y }).await;
    }

    pub async fn inject_key(&self, identity: &DeviceIdentity, action: KeyAction, keycode: i32) {
        self.inject(identity, InputEvent::Key { action, keycode }).await;
    }

    pub async fn go_home(&self, identity: &DeviceIdentity) {
        self.inject(identity, InputEvent::Home).await;
    }

    /// Subscribes to the device's log output, starting the log process if
    /// needed.
    ///
    /// # Errors
    ///
    /// [`EngineError::DeviceUnavailable`] when an Android AVD is not running.
    pub async fn open_log_stream(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<broadcast::Receiver<String>, EngineError> {
        let command = match identity.platform {
            Platform::Android => {
                let serial = self
                    .android
                    .resolve_serial(&identity.name)
                    .await?
                    .ok_or_else(|| EngineError::unavailable(identity, "emulator is not running"))?;
                LogCommand::android(&serial)
            }
            Platform::Ios => LogCommand::ios(&identity.name),
        };
        self.logs.subscribe(identity, &command).await
    }

    pub async fn stop_log_stream(&self, identity: &DeviceIdentity) -> bool {
        self.logs.stop(identity).await
    }

    /// Installs an artifact on the device.
    pub async fn install_app(
        &self,
        identity: &DeviceIdentity,
        artifact: &Path,
    ) -> Result<(), EngineError> {
        match identity.platform {
            Platform::Android => self.android.install_app(&identity.name, artifact).await,
            Platform::Ios => self.ios.install_app(&identity.name, artifact).await,
        }
    }

    /// Stops the stream and log stream, then the device itself.
    pub async fn stop_device(&self, identity: &DeviceIdentity) -> Result<(), EngineError> {
        self.logs.stop(identity).await;
        match identity.platform {
            Platform::Android => self.android.stop_emulator(&identity.name).await,
            Platform::Ios => self.ios.stop_simulator(&identity.name).await,
        }
    }

    /// Logs which host tools are missing and which AVDs are running.
    /// Never fails.
    pub async fn startup_scan(&self) -> StartupReport {
        let missing_tools: Vec<&'static str> = HOST_TOOLS
            .into_iter()
            .filter(|tool| !self.runner.is_available(tool))
            .collect();
        for tool in &missing_tools {
            warn!(tool, "host tool not found on PATH");
        }

        let avd_mapping = if self.runner.is_available(ADB) {
            match self.android.avd_mapping().await {
                Ok(mapping) => {
                    info!(running = mapping.len(), ?mapping, "emulator scan complete");
                    Some(mapping)
                }
                Err(e) => {
                    warn!(error = %e, "emulator scan failed");
                    None
                }
            }
        } else {
            None
        };
        StartupReport {
            missing_tools,
            avd_mapping,
        }
    }

    /// Stops every stream and log stream.  Devices keep running.
    pub async fn stop_all(&self) {
        self.android.sessions().stop_all().await;
        self.ios.sessions().stop_all().await;
        self.logs.stop_all().await;
        info!("all sessions stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::mock::{RecordingSink, ScriptedInput};
    use crate::infrastructure::tools::mock::{ok, MockToolRunner};

    fn engine(runner: MockToolRunner) -> StreamingEngine {
        StreamingEngine::new(Arc::new(runner), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_attach_failure_sends_one_error_and_closes() {
        // Arrange: no xcrun, so the simulator cannot start
        let engine = engine(MockToolRunner::new(|_, _| ok("")).without_tool("xcrun"));
        let sink = Arc::new(RecordingSink::new());

        // Act
        let outcome = engine
            .attach_connection(
                &DeviceIdentity::ios("U1"),
                sink.clone(),
                Box::new(ScriptedInput::hanging(vec![])),
            )
            .await;

        // Assert
        assert!(!outcome.is_ok());
        assert_eq!(sink.errors().len(), 1);
        assert!(sink.errors()[0].contains("xcrun"));
        assert_eq!(sink.frame_count(), 0);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let engine = engine(MockToolRunner::new(|_, _| ok("")));
        assert!(!engine.stop(&DeviceIdentity::android("Pixel_7")).await);
        assert!(!engine.stop_log_stream(&DeviceIdentity::ios("U1")).await);
    }

    #[tokio::test]
    async fn test_input_without_session_is_dropped() {
        let engine = engine(MockToolRunner::new(|_, _| ok("")));
        let id = DeviceIdentity::android("Pixel_7");

        engine.inject_touch(&id, TouchAction::Down, 0.5, 0.5).await;
        engine.inject_key(&id, KeyAction::Down, 4).await;
        engine.go_home(&id).await;

        assert!(engine.session(&id).is_none());
    }

    #[tokio::test]
    async fn test_startup_scan_reports_missing_tools_without_failing() {
        let engine = engine(
            MockToolRunner::new(|_, args| {
                if args.first().map(String::as_str) == Some("devices") {
                    ok("List of devices attached\n")
                } else {
                    ok("")
                }
            })
            .without_tool("xcrun")
            .without_tool("idb"),
        );

        let report = engine.startup_scan().await;

        assert_eq!(report.missing_tools, vec!["xcrun", "idb"]);
        assert_eq!(report.avd_mapping, Some(AvdMapping::new()));
    }

    #[tokio::test]
    async fn test_android_log_stream_requires_running_emulator() {
        let engine = engine(MockToolRunner::new(|_, _| ok("List of devices attached\n")));
        let err = engine
            .open_log_stream(&DeviceIdentity::android("Pixel_7"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
    }
}
