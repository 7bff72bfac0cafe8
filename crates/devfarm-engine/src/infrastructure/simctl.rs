//! Typed wrappers around `xcrun simctl` and `idb`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use devfarm_core::ScreenDimensions;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tools::{SharedRunner, ToolOutput};
use crate::error::EngineError;

pub const XCRUN: &str = "xcrun";
pub const IDB: &str = "idb";

const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// One simulator from `simctl list devices --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorInfo {
    pub udid: String,
    pub name: String,
    pub state: String,
    #[serde(default, rename = "isAvailable")]
    pub is_available: bool,
    /// Runtime identifier the simulator was listed under.
    #[serde(default)]
    pub runtime: String,
}

impl SimulatorInfo {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

/// One hardware model from `simctl list devicetypes --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    pub identifier: String,
    pub name: String,
    #[serde(default, rename = "productFamily")]
    pub product_family: Option<String>,
}

/// One OS runtime from `simctl list runtimes --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "isAvailable")]
    pub is_available: bool,
}

/// One target from `idb list-targets --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdbTarget {
    pub udid: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, rename = "type")]
    pub target_type: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
}

#[derive(Deserialize)]
struct DeviceTypeList {
    #[serde(default)]
    devicetypes: Vec<DeviceType>,
}

#[derive(Deserialize)]
struct RuntimeList {
    #[serde(default)]
    runtimes: Vec<Runtime>,
}

#[derive(Deserialize)]
struct DeviceList {
    devices: BTreeMap<String, Vec<SimulatorInfo>>,
}

#[derive(Deserialize)]
struct Describe {
    #[serde(default)]
    screen_dimensions: Option<ScreenDimensions>,
}

/// Flattens `simctl list devices --json`, tagging each entry with its runtime.
pub fn parse_device_list(json: &str) -> Result<Vec<SimulatorInfo>, EngineError> {
    let list: DeviceList =
        serde_json::from_str(json).map_err(|e| EngineError::parse("simctl device list", e))?;
    Ok(list
        .devices
        .into_iter()
        .flat_map(|(runtime, sims)| {
            sims.into_iter().map(move |mut sim| {
                sim.runtime = runtime.clone();
                sim
            })
        })
        .collect())
}

/// Parses `simctl list devicetypes --json`.  A missing key is an empty list.
pub fn parse_device_types(json: &str) -> Result<Vec<DeviceType>, EngineError> {
    let list: DeviceTypeList =
        serde_json::from_str(json).map_err(|e| EngineError::parse("simctl device types", e))?;
    Ok(list.devicetypes)
}

/// Parses `simctl list runtimes --json`.  A missing key is an empty list.
pub fn parse_runtimes(json: &str) -> Result<Vec<Runtime>, EngineError> {
    let list: RuntimeList =
        serde_json::from_str(json).map_err(|e| EngineError::parse("simctl runtimes", e))?;
    Ok(list.runtimes)
}

/// Parses the JSON Lines printed by `idb list-targets --json`, skipping lines
/// that are not a target object.
pub fn parse_targets(stdout: &str) -> Vec<IdbTarget> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!(error = %e, "skipping idb target line");
                None
            }
        })
        .collect()
}

/// Pulls `screen_dimensions` out of `idb describe --json`.
pub fn parse_describe(json: &str) -> Result<Option<ScreenDimensions>, EngineError> {
    let describe: Describe =
        serde_json::from_str(json).map_err(|e| EngineError::parse("idb describe", e))?;
    Ok(describe.screen_dimensions)
}

/// Resolves an install artifact: a `.app` bundle, a directory holding one
/// at its top level, or a plain file.
pub fn resolve_app_bundle(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        return Err(EngineError::ArtifactNotFound(path.to_path_buf()));
    }
    if !path.is_dir() || path.extension().is_some_and(|e| e == "app") {
        return Ok(path.to_path_buf());
    }
    let mut bundles: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && p.extension().is_some_and(|e| e == "app"))
        .collect();
    bundles.sort();
    bundles
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::ArtifactNotFound(path.join("*.app")))
}

/// `xcrun simctl` bound to a tool runner.
#[derive(Clone)]
pub struct Simctl {
    runner: SharedRunner,
}

impl Simctl {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }

    async fn simctl(
        &self,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, EngineError> {
        let mut full = vec!["simctl"];
        full.extend_from_slice(args);
        self.runner.run(XCRUN, &full, timeout).await
    }

    pub async fn list_devices(&self) -> Result<Vec<SimulatorInfo>, EngineError> {
        let out = self
            .simctl(&["list", "devices", "--json"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(XCRUN)?;
        parse_device_list(&out.stdout_text())
    }

    pub async fn list_device_types(&self) -> Result<Vec<DeviceType>, EngineError> {
        let out = self
            .simctl(&["list", "devicetypes", "--json"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(XCRUN)?;
        parse_device_types(&out.stdout_text())
    }

    pub async fn list_runtimes(&self) -> Result<Vec<Runtime>, EngineError> {
        let out = self
            .simctl(&["list", "runtimes", "--json"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(XCRUN)?;
        parse_runtimes(&out.stdout_text())
    }

    /// Creates a simulator and returns the UDID `simctl` prints.
    pub async fn create(
        &self,
        name: &str,
        device_type: &str,
        runtime: &str,
    ) -> Result<String, EngineError> {
        let out = self
            .simctl(&["create", name, device_type, runtime], Some(QUERY_TIMEOUT))
            .await?
            .require_success(XCRUN)?;
        let udid = out.stdout_text().trim().to_string();
        if udid.is_empty() {
            return Err(EngineError::parse("simctl create", "no UDID printed"));
        }
        Ok(udid)
    }

    pub async fn delete(&self, udid: &str) -> Result<(), EngineError> {
        self.simctl(&["delete", udid], Some(QUERY_TIMEOUT))
            .await?
            .require_success(XCRUN)?;
        Ok(())
    }

    pub async fn boot(&self, udid: &str) -> Result<(), EngineError> {
        let out = self.simctl(&["boot", udid], None).await?;
        // Booting an already booted device is not a failure.
        if out.success || out.stderr.contains("current state: Booted") {
            Ok(())
        } else {
            out.require_success(XCRUN).map(|_| ())
        }
    }

    pub async fn shutdown(&self, udid: &str) -> Result<(), EngineError> {
        self.simctl(&["shutdown", udid], None)
            .await?
            .require_success(XCRUN)?;
        Ok(())
    }

    /// PNG screenshot written to stdout.
    pub async fn screenshot_to_stdout(
        &self,
        udid: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        let out = self
            .simctl(&["io", udid, "screenshot", "--type=png", "-"], Some(timeout))
            .await?
            .require_success(XCRUN)?;
        if out.stdout.is_empty() {
            return Err(EngineError::CaptureFailed("simctl wrote no image".into()));
        }
        Ok(out.stdout)
    }

    pub async fn screenshot_to_file(
        &self,
        udid: &str,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let path = path.to_string_lossy();
        self.simctl(&["io", udid, "screenshot", "--type=png", &path], Some(timeout))
            .await?
            .require_success(XCRUN)?;
        Ok(())
    }
}

/// `idb` bound to a tool runner.
#[derive(Clone)]
pub struct Idb {
    runner: SharedRunner,
}

impl Idb {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }

    pub fn is_available(&self) -> bool {
        self.runner.is_available(IDB)
    }

    /// Every simulator and device `idb` can reach.
    pub async fn list_targets(&self) -> Result<Vec<IdbTarget>, EngineError> {
        let out = self
            .runner
            .run(IDB, &["list-targets", "--json"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(IDB)?;
        Ok(parse_targets(&out.stdout_text()))
    }

    pub async fn connect(&self, udid: &str) -> Result<(), EngineError> {
        self.runner
            .run(IDB, &["connect", udid], Some(QUERY_TIMEOUT))
            .await?
            .require_success(IDB)?;
        Ok(())
    }

    pub async fn describe(&self, udid: &str) -> Result<Option<ScreenDimensions>, EngineError> {
        let out = self
            .runner
            .run(IDB, &["describe", "--udid", udid, "--json"], Some(QUERY_TIMEOUT))
            .await?
            .require_success(IDB)?;
        parse_describe(&out.stdout_text())
    }

    pub async fn install(&self, udid: &str, bundle: &Path) -> Result<(), EngineError> {
        let bundle = bundle.to_string_lossy();
        self.runner
            .run(IDB, &["install", "--udid", udid, &bundle], None)
            .await?
            .require_success(IDB)?;
        Ok(())
    }

    pub async fn screenshot_to_file(
        &self,
        udid: &str,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let path = path.to_string_lossy();
        self.runner
            .run(IDB, &["screenshot", "--udid", udid, &path], Some(timeout))
            .await?
            .require_success(IDB)?;
        Ok(())
    }

    pub async fn tap(&self, udid: &str, x: f64, y: f64) -> Result<(), EngineError> {
        let (x, y) = (fmt_coord(x), fmt_coord(y));
        self.ui(&["tap", &x, &y, "--udid", udid]).await
    }

    pub async fn swipe(
        &self,
        udid: &str,
        from: (f64, f64),
        to: (f64, f64),
        duration_secs: f64,
    ) -> Result<(), EngineError> {
        let coords = [fmt_coord(from.0), fmt_coord(from.1), fmt_coord(to.0), fmt_coord(to.1)];
        let duration = duration_secs.to_string();
        self.ui(&[
            "swipe",
            &coords[0],
            &coords[1],
            &coords[2],
            &coords[3],
            "--duration",
            &duration,
            "--udid",
            udid,
        ])
        .await
    }

    pub async fn home(&self, udid: &str) -> Result<(), EngineError> {
        self.ui(&["button", "HOME", "--udid", udid]).await
    }

    async fn ui(&self, args: &[&str]) -> Result<(), EngineError> {
        let mut full = vec!["ui"];
        full.extend_from_slice(args);
        debug!(?full, "idb ui");
        self.runner
            .run(IDB, &full, Some(QUERY_TIMEOUT))
            .await?
            .require_success(IDB)?;
        Ok(())
    }
}

/// Whole points print without a fractional part.
fn fmt_coord(v: f64) -> String {
    format!("{}", v.round() as i64)
}
