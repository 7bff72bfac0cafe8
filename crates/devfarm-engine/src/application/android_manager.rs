//! Android emulator lifecycle and AVD-to-serial resolution.
//!
//! The AVD → serial mapping is never cached.  Every call asks `adb` which
//! emulators are online and asks each one its AVD name, so the answer always
//! reflects the devices as they are now.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use devfarm_core::DeviceIdentity;
use tracing::{debug, info, warn};

use super::device_stream::DeviceStream;
use super::session_registry::{KeyedGates, SessionHandle, SessionRegistry};
use crate::domain::config::{AndroidConfig, ScrcpyConfig};
use crate::domain::handles::EmulatorHandle;
use crate::error::EngineError;
use crate::infrastructure::adb::{Adb, ConnectedDevice, ADB, AVDMANAGER, EMULATOR, SDKMANAGER};
use crate::infrastructure::scrcpy::ScrcpyClient;
use crate::infrastructure::tools::{as_strs, ProcessHandle, SharedRunner, SpawnMode};

/// AVD name → every online serial reporting that name.
pub type AvdMapping = BTreeMap<String, Vec<String>>;

pub struct AndroidDeviceManager {
    adb: Adb,
    android: AndroidConfig,
    scrcpy: ScrcpyConfig,
    sessions: SessionRegistry,
    start_gates: KeyedGates,
    spawned: Mutex<HashMap<String, Box<dyn ProcessHandle>>>,
}

impl AndroidDeviceManager {
    pub fn new(runner: SharedRunner, android: AndroidConfig, scrcpy: ScrcpyConfig) -> Self {
        Self {
            adb: Adb::new(runner),
            android,
            scrcpy,
            sessions: SessionRegistry::new(),
            start_gates: KeyedGates::new(),
            spawned: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// AVDs defined on this host.
    pub async fn list_avds(&self) -> Result<Vec<String>, EngineError> {
        self.adb.runner().ensure_available(EMULATOR)?;
        self.adb.list_avds().await
    }

    /// System image packages an AVD can be created from.
    pub async fn list_installed_system_images(&self) -> Result<Vec<String>, EngineError> {
        self.adb.runner().ensure_available(SDKMANAGER)?;
        self.adb.installed_system_images().await
    }

    /// Defines a new AVD.  Does not start it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MissingDependency`] without `avdmanager`.
    /// - [`EngineError::Command`] when `avdmanager` rejects the name or package.
    pub async fn create_avd(
        &self,
        name: &str,
        package: &str,
        device_profile: &str,
    ) -> Result<(), EngineError> {
        self.adb.runner().ensure_available(AVDMANAGER)?;
        self.adb.create_avd(name, package, device_profile).await?;
        info!(avd = name, package, device_profile, "avd created");
        Ok(())
    }

    /// Removes an AVD definition.  A stream still open on it is stopped first.
    pub async fn delete_avd(&self, name: &str) -> Result<(), EngineError> {
        self.adb.runner().ensure_available(AVDMANAGER)?;
        self.stop_stream(name).await;
        self.adb.delete_avd(name).await?;
        info!(avd = name, "avd deleted");
        Ok(())
    }

    /// Devices `adb` reports as online.
    pub async fn list_connected_devices(&self) -> Result<Vec<ConnectedDevice>, EngineError> {
        self.adb.runner().ensure_available(ADB)?;
        Ok(self
            .adb
            .devices()
            .await?
            .into_iter()
            .filter(ConnectedDevice::is_online)
            .collect())
    }

    /// Which running emulator serials belong to which AVD, right now.
    pub async fn avd_mapping(&self) -> Result<AvdMapping, EngineError> {
        let mut mapping = AvdMapping::new();
        for device in self.list_connected_devices().await? {
            if !device.is_emulator() {
                continue;
            }
            match self.adb.avd_name(&device.serial).await {
                Ok(Some(name)) => mapping.entry(name).or_default().push(device.serial),
                Ok(None) => debug!(serial = %device.serial, "emulator did not report an AVD name"),
                Err(e) => debug!(serial = %device.serial, error = %e, "avd name query failed"),
            }
        }
        Ok(mapping)
    }

    /// Kept for callers that expect an explicit refresh; the mapping is
    /// always computed fresh, so there is nothing to do.
    pub async fn refresh_mapping(&self) {}

    /// The single serial running `avd_name`, if any.
    ///
    /// # Errors
    ///
    /// [`EngineError::AmbiguousDevice`] when several serials report the name.
    pub async fn resolve_serial(&self, avd_name: &str) -> Result<Option<String>, EngineError> {
        let mut mapping = self.avd_mapping().await?;
        match mapping.remove(avd_name) {
            None => Ok(None),
            Some(mut serials) if serials.len() == 1 => Ok(serials.pop()),
            Some(serials) => Err(EngineError::AmbiguousDevice {
                name: avd_name.to_string(),
                serials,
            }),
        }
    }

    /// Starts `avd_name` unless it is already running.
    ///
    /// Concurrent calls for the same AVD are serialised, so only one
    /// emulator process is ever spawned.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MissingDependency`] without `emulator` or `adb`.
    /// - [`EngineError::DeviceUnavailable`] when the process exits early.
    /// - [`EngineError::BootTimeout`] when it never shows up in `adb`.
    pub async fn start_emulator(&self, avd_name: &str) -> Result<EmulatorHandle, EngineError> {
        let runner = self.adb.runner();
        runner.ensure_available(EMULATOR)?;
        runner.ensure_available(ADB)?;

        let identity = DeviceIdentity::android(avd_name);
        let _gate = self.start_gates.lock(&identity).await;

        if let Some(serial) = self.resolve_serial(avd_name).await? {
            debug!(avd = avd_name, %serial, "emulator already running");
            let mut handle = EmulatorHandle::new(avd_name, serial);
            handle.reused = true;
            handle.pid = self.spawned_pid(avd_name);
            return Ok(handle);
        }

        let mut args = vec!["-avd", avd_name];
        args.extend(as_strs(&self.android.emulator_args));
        let process = runner.spawn(EMULATOR, &args, SpawnMode::Detached).await?;
        let pid = process.id();
        info!(avd = avd_name, ?pid, "emulator process spawned");
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(avd_name.to_string(), process);

        let attempts = self.android.start_poll_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.android.poll_interval()).await;
            if let Some(serial) = self.resolve_serial(avd_name).await? {
                info!(avd = avd_name, %serial, attempt, "emulator registered with adb");
                let mut handle = EmulatorHandle::new(avd_name, serial);
                handle.pid = pid;
                return Ok(handle);
            }
            if !self.spawned_running(avd_name) {
                return Err(EngineError::unavailable(
                    &identity,
                    "emulator process exited during startup",
                ));
            }
        }
        Err(EngineError::BootTimeout {
            what: format!("emulator {avd_name} registration"),
            attempts,
        })
    }

    fn spawned_pid(&self, avd_name: &str) -> Option<u32> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(avd_name)
            .and_then(|p| p.id())
    }

    fn spawned_running(&self, avd_name: &str) -> bool {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(avd_name)
            .map_or(true, |p| p.is_running())
    }

    /// Polls `sys.boot_completed` until it reads `1`.
    ///
    /// # Errors
    ///
    /// [`EngineError::BootTimeout`] after the configured number of polls.
    /// The device itself is left running.
    pub async fn wait_for_boot(&self, serial: &str) -> Result<(), EngineError> {
        let attempts = self.android.boot_poll_attempts;
        for attempt in 1..=attempts {
            match self.adb.boot_completed(serial).await {
                Ok(true) => {
                    debug!(serial, attempt, "boot completed");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!(serial, error = %e, "boot poll failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.android.poll_interval()).await;
            }
        }
        Err(EngineError::BootTimeout {
            what: format!("boot of {serial}"),
            attempts,
        })
    }

    /// Returns the live stream for `avd_name`, starting the emulator and
    /// the scrcpy session as needed.
    pub async fn start_stream(&self, avd_name: &str) -> Result<SessionHandle, EngineError> {
        let identity = DeviceIdentity::android(avd_name);
        self.sessions
            .get_or_try_start(&identity, || async {
                let emulator = self.start_emulator(avd_name).await?;
                self.wait_for_boot(&emulator.serial).await?;
                let client = ScrcpyClient::launch(
                    self.adb.clone(),
                    identity.clone(),
                    &emulator.serial,
                    &self.scrcpy,
                )
                .await?;
                Ok(Arc::new(client) as Arc<dyn DeviceStream>)
            })
            .await
    }

    /// Tears down the stream for `avd_name`.  No-op if none is running.
    pub async fn stop_stream(&self, avd_name: &str) -> bool {
        self.sessions.stop(&DeviceIdentity::android(avd_name)).await
    }

    /// Stops the stream, then kills every emulator reporting `avd_name`.
    pub async fn stop_emulator(&self, avd_name: &str) -> Result<(), EngineError> {
        self.stop_stream(avd_name).await;
        let serials = self.avd_mapping().await?.remove(avd_name).unwrap_or_default();
        for serial in &serials {
            if let Err(e) = self.adb.emu_kill(serial).await {
                warn!(avd = avd_name, %serial, error = %e, "emu kill failed");
            }
        }
        let spawned = self
            .spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(avd_name);
        if let Some(mut process) = spawned {
            process.terminate().await;
        }
        info!(avd = avd_name, count = serials.len(), "emulator stopped");
        Ok(())
    }

    /// Installs an APK on the running, booted emulator for `avd_name`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ArtifactNotFound`] for a missing file.
    /// - [`EngineError::DeviceUnavailable`] when not running or not booted.
    /// - [`EngineError::AmbiguousDevice`] when several serials match.
    pub async fn install_app(&self, avd_name: &str, apk: &Path) -> Result<(), EngineError> {
        if !apk.is_file() {
            return Err(EngineError::ArtifactNotFound(apk.to_path_buf()));
        }
        let identity = DeviceIdentity::android(avd_name);
        let serial = self
            .resolve_serial(avd_name)
            .await?
            .ok_or_else(|| EngineError::unavailable(&identity, "emulator is not running"))?;
        if !self.adb.boot_completed(&serial).await? {
            return Err(EngineError::unavailable(&identity, "emulator has not finished booting"));
        }
        self.adb.install(&serial, apk).await?;
        info!(avd = avd_name, %serial, apk = %apk.display(), "app installed");
        Ok(())
    }
}
