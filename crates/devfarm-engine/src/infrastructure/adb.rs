//! Typed wrappers around the `adb`, `emulator`, and SDK manager command lines.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::tools::{SharedRunner, ToolOutput};
use crate::error::EngineError;

pub const ADB: &str = "adb";
pub const EMULATOR: &str = "emulator";
pub const AVDMANAGER: &str = "avdmanager";
pub const SDKMANAGER: &str = "sdkmanager";

/// Hardware profile used when an AVD is created without one.
pub const DEFAULT_DEVICE_PROFILE: &str = "pixel_6";

/// Bound on quick queries (`getprop`, `emu avd name`, `wm size`).
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedDevice {
    pub serial: String,
    pub state: String,
}

impl ConnectedDevice {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

/// Parses `adb devices` output, skipping the header, daemon banners, and
/// blank lines.
pub fn parse_devices(stdout: &str) -> Vec<ConnectedDevice> {
    stdout
        .lines()
        .filter(|l| !l.starts_with("List of devices") && !l.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(ConnectedDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parses `adb emu avd name`: the first non-empty line that is not `OK`.
pub fn parse_avd_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && *l != "OK")
        .map(str::to_string)
}

/// Parses `wm size`, preferring the physical size line.
pub fn parse_wm_size(stdout: &str) -> Option<(u32, u32)> {
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("Physical size:"))?;
    let (_, dims) = line.split_once(':')?;
    let (w, h) = dims.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Parses `emulator -list-avds`, dropping diagnostic lines the emulator
/// sometimes prints first.
pub fn parse_avd_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("INFO") && !l.contains(' '))
        .map(str::to_string)
        .collect()
}

/// Parses `sdkmanager --list_installed` down to the system image package
/// paths, e.g. `system-images;android-34;google_apis;x86_64`.
pub fn parse_installed_system_images(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split('|').next())
        .map(str::trim)
        .filter(|path| path.starts_with("system-images;"))
        .map(str::to_string)
        .collect()
}

/// `adb` bound to a tool runner.
#[derive(Clone)]
pub struct Adb {
    runner: SharedRunner,
}

impl Adb {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &SharedRunner {
        &self.runner
    }

    async fn on(&self, serial: &str, args: &[&str]) -> Result<ToolOutput, EngineError> {
        let mut full = vec!["-s", serial];
        full.extend_from_slice(args);
        self.runner.run(ADB, &full, Some(QUERY_TIMEOUT)).await
    }

    /// Every attached device, in any state.
    pub async fn devices(&self) -> Result<Vec<ConnectedDevice>, EngineError> {
        let out = self
            .runner
            .run(ADB, &["devices"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(ADB)?;
        Ok(parse_devices(&out.stdout_text()))
    }

    /// The AVD name an emulator reports, if it answers.
    pub async fn avd_name(&self, serial: &str) -> Result<Option<String>, EngineError> {
        let out = self.on(serial, &["emu", "avd", "name"]).await?;
        if !out.success {
            debug!(serial, stderr = %out.stderr.trim(), "emu avd name failed");
            return Ok(None);
        }
        Ok(parse_avd_name(&out.stdout_text()))
    }

    pub async fn boot_completed(&self, serial: &str) -> Result<bool, EngineError> {
        let out = self
            .on(serial, &["shell", "getprop", "sys.boot_completed"])
            .await?;
        Ok(out.success && out.stdout_text().trim() == "1")
    }

    pub async fn physical_size(&self, serial: &str) -> Result<Option<(u32, u32)>, EngineError> {
        let out = self.on(serial, &["shell", "wm", "size"]).await?;
        Ok(out
            .success
            .then(|| parse_wm_size(&out.stdout_text()))
            .flatten())
    }

    pub async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<(), EngineError> {
        let local = local.to_string_lossy();
        self.runner
            .run(ADB, &["-s", serial, "push", &local, remote], None)
            .await?
            .require_success(ADB)?;
        Ok(())
    }

    pub async fn forward(
        &self,
        serial: &str,
        port: u16,
        socket_name: &str,
    ) -> Result<(), EngineError> {
        let local = format!("tcp:{port}");
        let remote = format!("localabstract:{socket_name}");
        self.on(serial, &["forward", &local, &remote])
            .await?
            .require_success(ADB)?;
        Ok(())
    }

    pub async fn forward_remove(&self, serial: &str, port: u16) -> Result<(), EngineError> {
        let local = format!("tcp:{port}");
        self.on(serial, &["forward", "--remove", &local])
            .await?
            .require_success(ADB)?;
        Ok(())
    }

    pub async fn emu_kill(&self, serial: &str) -> Result<(), EngineError> {
        self.on(serial, &["emu", "kill"]).await?.require_success(ADB)?;
        Ok(())
    }

    pub async fn install(&self, serial: &str, apk: &Path) -> Result<(), EngineError> {
        let apk = apk.to_string_lossy();
        let out = self
            .runner
            .run(ADB, &["-s", serial, "install", "-r", &apk], None)
            .await?;
        // adb install can exit 0 while printing "Failure [...]".
        if out.success && !out.stdout_text().contains("Failure") {
            Ok(())
        } else {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout_text()
            } else {
                out.stderr.clone()
            };
            Err(EngineError::Command {
                program: ADB.to_string(),
                stderr: detail.trim().to_string(),
            })
        }
    }

    /// AVDs defined on this host.
    pub async fn list_avds(&self) -> Result<Vec<String>, EngineError> {
        let out = self
            .runner
            .run(EMULATOR, &["-list-avds"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(EMULATOR)?;
        Ok(parse_avd_list(&out.stdout_text()))
    }

    /// System image packages installed through the SDK manager.
    pub async fn installed_system_images(&self) -> Result<Vec<String>, EngineError> {
        let out = self
            .runner
            .run(SDKMANAGER, &["--list_installed"], None)
            .await?
            .require_success(SDKMANAGER)?;
        Ok(parse_installed_system_images(&out.stdout_text()))
    }

    /// Creates an AVD named `name` from a system image package.
    ///
    /// Stdin is closed, so the custom hardware profile prompt takes its
    /// default answer.
    pub async fn create_avd(
        &self,
        name: &str,
        package: &str,
        device_profile: &str,
    ) -> Result<(), EngineError> {
        let args = ["create", "avd", "-n", name, "-k", package, "-d", device_profile];
        self.runner
            .run(AVDMANAGER, &args, None)
            .await?
            .require_success(AVDMANAGER)?;
        Ok(())
    }

    /// Deletes the AVD named `name` along with its data directory.
    pub async fn delete_avd(&self, name: &str) -> Result<(), EngineError> {
        self.runner
            .run(AVDMANAGER, &["delete", "avd", "-n", name], Some(QUERY_TIMEOUT))
            .await?
            .require_success(AVDMANAGER)?;
        Ok(())
    }
}
