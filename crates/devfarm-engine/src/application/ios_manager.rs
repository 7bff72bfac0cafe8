//! iOS simulator lifecycle.  Simulators are addressed by UDID.

use std::path::Path;
use std::sync::Arc;

use devfarm_core::{DeviceIdentity, DeviceMetrics};
use tracing::{debug, info, warn};

use super::device_stream::DeviceStream;
use super::session_registry::{SessionHandle, SessionRegistry};
use crate::domain::config::IosConfig;
use crate::error::EngineError;
use crate::infrastructure::capture::ScreenCapture;
use crate::infrastructure::simctl::{
    resolve_app_bundle, DeviceType, IdbTarget, Idb, Runtime, Simctl, SimulatorInfo, IDB, XCRUN,
};
use crate::infrastructure::tools::SharedRunner;

pub struct IosDeviceManager {
    runner: SharedRunner,
    simctl: Simctl,
    idb: Idb,
    config: IosConfig,
    sessions: SessionRegistry,
}

impl IosDeviceManager {
    pub fn new(runner: SharedRunner, config: IosConfig) -> Self {
        Self {
            simctl: Simctl::new(runner.clone()),
            idb: Idb::new(runner.clone()),
            runner,
            config,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn list_simulators(&self) -> Result<Vec<SimulatorInfo>, EngineError> {
        self.runner.ensure_available(XCRUN)?;
        self.simctl.list_devices().await
    }

    /// Targets known to `idb`, including ones `simctl` does not manage.
    pub async fn list_targets(&self) -> Result<Vec<IdbTarget>, EngineError> {
        self.runner.ensure_available(IDB)?;
        self.idb.list_targets().await
    }

    pub async fn list_device_types(&self) -> Result<Vec<DeviceType>, EngineError> {
        self.runner.ensure_available(XCRUN)?;
        self.simctl.list_device_types().await
    }

    pub async fn list_runtimes(&self) -> Result<Vec<Runtime>, EngineError> {
        self.runner.ensure_available(XCRUN)?;
        self.simctl.list_runtimes().await
    }

    /// Creates a simulator and returns its UDID.
    ///
    /// `device_type` and `runtime` are identifiers such as
    /// `com.apple.CoreSimulator.SimDeviceType.iPhone-15` and
    /// `com.apple.CoreSimulator.SimRuntime.iOS-17-2`.
    pub async fn create_simulator(
        &self,
        name: &str,
        device_type: &str,
        runtime: &str,
    ) -> Result<String, EngineError> {
        self.runner.ensure_available(XCRUN)?;
        let udid = self.simctl.create(name, device_type, runtime).await?;
        info!(%udid, name, device_type, runtime, "simulator created");
        Ok(udid)
    }

    /// Deletes a simulator, stopping its stream first.
    pub async fn delete_simulator(&self, udid: &str) -> Result<(), EngineError> {
        self.runner.ensure_available(XCRUN)?;
        self.stop_stream(udid).await;
        self.simctl.delete(udid).await?;
        info!(udid, "simulator deleted");
        Ok(())
    }

    pub async fn simulator(&self, udid: &str) -> Result<Option<SimulatorInfo>, EngineError> {
        Ok(self
            .list_simulators()
            .await?
            .into_iter()
            .find(|sim| sim.udid == udid))
    }

    pub async fn is_booted(&self, udid: &str) -> Result<bool, EngineError> {
        Ok(self.simulator(udid).await?.is_some_and(|sim| sim.is_booted()))
    }

    /// Boots `udid` unless it is already booted, then connects `idb` to it
    /// when `idb` is installed.
    pub async fn start_simulator(&self, udid: &str) -> Result<SimulatorInfo, EngineError> {
        let identity = DeviceIdentity::ios(udid);
        let sim = self
            .simulator(udid)
            .await?
            .ok_or_else(|| EngineError::unavailable(&identity, "no simulator with this UDID"))?;

        if sim.is_booted() {
            debug!(udid, "simulator already booted");
        } else {
            info!(udid, name = %sim.name, "booting simulator");
            self.simctl.boot(udid).await?;
        }

        if self.idb.is_available() {
            if let Err(e) = self.idb.connect(udid).await {
                warn!(udid, error = %e, "idb connect failed, input may not work");
            }
        }
        Ok(sim)
    }

    /// Polls the simulator list until `udid` reports `Booted`.
    ///
    /// # Errors
    ///
    /// [`EngineError::BootTimeout`] after the configured number of polls.
    pub async fn wait_for_boot(&self, udid: &str) -> Result<(), EngineError> {
        let attempts = self.config.boot_poll_attempts;
        for attempt in 1..=attempts {
            match self.is_booted(udid).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => debug!(udid, error = %e, "boot poll failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }
        Err(EngineError::BootTimeout {
            what: format!("boot of simulator {udid}"),
            attempts,
        })
    }

    /// Returns the live capture stream for `udid`, booting it as needed.
    pub async fn start_stream(&self, udid: &str) -> Result<SessionHandle, EngineError> {
        let identity = DeviceIdentity::ios(udid);
        self.sessions
            .get_or_try_start(&identity, || async {
                self.start_simulator(udid).await?;
                self.wait_for_boot(udid).await?;
                let capture =
                    ScreenCapture::open(self.runner.clone(), identity.clone(), self.config.clone())
                        .await?;
                Ok(Arc::new(capture) as Arc<dyn DeviceStream>)
            })
            .await
    }

    pub async fn stop_stream(&self, udid: &str) -> bool {
        self.sessions.stop(&DeviceIdentity::ios(udid)).await
    }

    pub async fn stop_simulator(&self, udid: &str) -> Result<(), EngineError> {
        self.stop_stream(udid).await;
        self.simctl.shutdown(udid).await?;
        info!(udid, "simulator shut down");
        Ok(())
    }

    /// Installs a `.app` bundle (or the first one inside a directory).
    ///
    /// # Errors
    ///
    /// - [`EngineError::ArtifactNotFound`] when no bundle is found.
    /// - [`EngineError::DeviceUnavailable`] when the simulator is not booted.
    /// - [`EngineError::MissingDependency`] without `idb`.
    pub async fn install_app(&self, udid: &str, artifact: &Path) -> Result<(), EngineError> {
        let bundle = resolve_app_bundle(artifact)?;
        if !self.is_booted(udid).await? {
            let identity = DeviceIdentity::ios(udid);
            return Err(EngineError::unavailable(&identity, "simulator is not booted"));
        }
        self.runner.ensure_available(IDB)?;
        self.idb.install(udid, &bundle).await?;
        info!(udid, bundle = %bundle.display(), "app installed");
        Ok(())
    }

    /// Screen size of `udid` from `idb describe`, if it can be read.
    pub async fn device_metrics(&self, udid: &str) -> Result<Option<DeviceMetrics>, EngineError> {
        self.runner.ensure_available(IDB)?;
        Ok(self
            .idb
            .describe(udid)
            .await?
            .map(|dims| DeviceMetrics::from_screen_dimensions(&dims, (0, 0))))
    }
}
