//! Engine configuration.
//!
//! Every field has a serde default, so an empty TOML table (or no file at
//! all) yields a working configuration:
//!
//! ```toml
//! [scrcpy]
//! server_path = "/opt/scrcpy/scrcpy-server"
//! max_size = 1024
//!
//! [android]
//! boot_poll_attempts = 90
//!
//! [ios]
//! max_fps = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Locations searched for the scrcpy server when none is configured.
pub const SERVER_CANDIDATES: [&str; 3] =
    ["app/scrcpy-server", "scrcpy-server", "scrcpy-server.jar"];

/// Where the server jar is pushed on the device.
pub const DEVICE_SERVER_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub scrcpy: ScrcpyConfig,
    #[serde(default)]
    pub android: AndroidConfig,
    #[serde(default)]
    pub ios: IosConfig,
}

/// Companion server launch parameters and socket timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrcpyConfig {
    /// Explicit path to the server jar.  `None` searches [`SERVER_CANDIDATES`].
    #[serde(default)]
    pub server_path: Option<PathBuf>,
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    #[serde(default = "default_bit_rate")]
    pub video_bit_rate: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Encoder the server is asked to use.  Empty lets the device choose.
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    /// Pause between launching the server and the first connect attempt.
    #[serde(default = "default_launch_grace_ms")]
    pub launch_grace_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Screen size assumed until the stream reports the real one.
    #[serde(default = "default_seed_width")]
    pub seed_width: u32,
    #[serde(default = "default_seed_height")]
    pub seed_height: u32,
}

/// Emulator start/boot polling bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AndroidConfig {
    #[serde(default = "default_poll_attempts")]
    pub start_poll_attempts: u32,
    #[serde(default = "default_poll_attempts")]
    pub boot_poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Extra flags passed to `emulator -avd <name>`.
    #[serde(default = "default_emulator_args")]
    pub emulator_args: Vec<String>,
}

/// Screenshot loop and gesture settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IosConfig {
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_capture_backoff_ms")]
    pub capture_backoff_ms: u64,
    #[serde(default = "default_swipe_threshold")]
    pub swipe_threshold_px: f64,
    #[serde(default = "default_swipe_duration")]
    pub swipe_duration_secs: f64,
    #[serde(default = "default_poll_attempts")]
    pub boot_poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_server_version() -> String {
    "2.7".to_string()
}
fn default_socket_name() -> String {
    "scrcpy".to_string()
}
fn default_bit_rate() -> u32 {
    1_000_000
}
fn default_max_size() -> u32 {
    720
}
fn default_video_encoder() -> String {
    "OMX.google.h264.encoder".to_string()
}
fn default_launch_grace_ms() -> u64 {
    1_000
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_connect_backoff_ms() -> u64 {
    500
}
fn default_handshake_timeout_ms() -> u64 {
    2_000
}
fn default_seed_width() -> u32 {
    720
}
fn default_seed_height() -> u32 {
    1280
}
fn default_poll_attempts() -> u32 {
    60
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_emulator_args() -> Vec<String> {
    ["-no-window", "-gpu", "host", "-no-boot-anim", "-no-snapshot"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_fps() -> u32 {
    60
}
fn default_jpeg_quality() -> u8 {
    58
}
fn default_capture_timeout_ms() -> u64 {
    2_000
}
fn default_capture_backoff_ms() -> u64 {
    100
}
fn default_swipe_threshold() -> f64 {
    devfarm_core::domain::gesture::DEFAULT_SWIPE_THRESHOLD_PX
}
fn default_swipe_duration() -> f64 {
    0.05
}

impl Default for ScrcpyConfig {
    fn default() -> Self {
        Self {
            server_path: None,
            server_version: default_server_version(),
            socket_name: default_socket_name(),
            video_bit_rate: default_bit_rate(),
            max_size: default_max_size(),
            video_encoder: default_video_encoder(),
            launch_grace_ms: default_launch_grace_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            seed_width: default_seed_width(),
            seed_height: default_seed_height(),
        }
    }
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            start_poll_attempts: default_poll_attempts(),
            boot_poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            emulator_args: default_emulator_args(),
        }
    }
}

impl Default for IosConfig {
    fn default() -> Self {
        Self {
            max_fps: default_max_fps(),
            jpeg_quality: default_jpeg_quality(),
            capture_timeout_ms: default_capture_timeout_ms(),
            capture_backoff_ms: default_capture_backoff_ms(),
            swipe_threshold_px: default_swipe_threshold(),
            swipe_duration_secs: default_swipe_duration(),
            boot_poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ScrcpyConfig {
    /// Finds the server jar: the configured path, else the first candidate
    /// under `base_dir` that exists.
    ///
    /// # Errors
    ///
    /// [`EngineError::MissingDependency`] when nothing is found.
    pub fn resolve_server_path(&self, base_dir: &Path) -> Result<PathBuf, EngineError> {
        if let Some(path) = &self.server_path {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(EngineError::missing(format!("scrcpy-server ({})", path.display())))
            };
        }
        SERVER_CANDIDATES
            .iter()
            .map(|c| base_dir.join(c))
            .find(|p| p.is_file())
            .ok_or_else(|| EngineError::missing("scrcpy-server"))
    }

    /// Arguments after `app_process` for the server launch.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = vec![
            "/".to_string(),
            "com.genymobile.scrcpy.Server".to_string(),
            self.server_version.clone(),
            "log_level=info".to_string(),
            "video=true".to_string(),
            "audio=false".to_string(),
            "control=true".to_string(),
            "tunnel_forward=true".to_string(),
            format!("video_bit_rate={}", self.video_bit_rate),
            format!("max_size={}", self.max_size),
            "send_device_meta=false".to_string(),
            "send_frame_meta=true".to_string(),
            "send_dummy_byte=true".to_string(),
            "raw_stream=false".to_string(),
        ];
        if !self.video_encoder.is_empty() {
            args.push(format!("video_encoder={}", self.video_encoder));
        }
        args
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }
}

impl AndroidConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl IosConfig {
    /// Minimum time between two emitted frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.max_fps.max(1)))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
