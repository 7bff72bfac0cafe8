//! Device identity and screen metrics.
//!
//! A [`DeviceIdentity`] is the *logical* name a user asks for: an AVD name on
//! Android or a simulator UDID on iOS.  It is deliberately not the transport
//! serial (`emulator-5554`), which only exists while the emulator runs and
//! can change between launches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two device families the farm supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// The lowercase name used in routes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Logical identity of a device: its name plus the platform it runs on.
///
/// Two identities with the same name on different platforms are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub platform: Platform,
}

impl DeviceIdentity {
    /// An Android emulator identified by its AVD name.
    pub fn android(avd_name: impl Into<String>) -> Self {
        Self {
            name: avd_name.into(),
            platform: Platform::Android,
        }
    }

    /// An iOS simulator identified by its UDID.
    pub fn ios(udid: impl Into<String>) -> Self {
        Self {
            name: udid.into(),
            platform: Platform::Ios,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.name)
    }
}

/// Screen description as reported by `idb describe --json`.
///
/// `width`/`height` are logical points, the `*_pixels` fields are the
/// framebuffer size.  Any field may be missing on older tool versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenDimensions {
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub width_pixels: Option<f64>,
    #[serde(default)]
    pub height_pixels: Option<f64>,
    #[serde(default)]
    pub density: Option<f64>,
}

/// Last-known screen metrics for a live stream.
///
/// Pixel dimensions start as a guess and are overwritten by whatever the live
/// stream reports; see [`DeviceMetrics::learn_pixels`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub width_points: Option<f64>,
    pub height_points: Option<f64>,
    pub density: Option<f64>,
}

impl DeviceMetrics {
    /// Metrics known only by pixel size.
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width_pixels: width,
            height_pixels: height,
            width_points: None,
            height_points: None,
            density: None,
        }
    }

    /// Builds metrics from an `idb describe` answer, using `fallback` for
    /// any missing pixel dimension.
    pub fn from_screen_dimensions(dims: &ScreenDimensions, fallback: (u32, u32)) -> Self {
        let to_px = |v: Option<f64>, default: u32| {
            v.filter(|v| *v > 0.0).map(|v| v.round() as u32).unwrap_or(default)
        };
        Self {
            width_pixels: to_px(dims.width_pixels, fallback.0),
            height_pixels: to_px(dims.height_pixels, fallback.1),
            width_points: dims.width,
            height_points: dims.height,
            density: dims.density,
        }
    }

    /// Records the pixel size observed on the live stream.
    ///
    /// Returns `true` when the size changed.  Zero dimensions are ignored.
    pub fn learn_pixels(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let changed = self.width_pixels != width || self.height_pixels != height;
        self.width_pixels = width;
        self.height_pixels = height;
        changed
    }

    /// `(width, height)` in device pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width_pixels, self.height_pixels)
    }
}
