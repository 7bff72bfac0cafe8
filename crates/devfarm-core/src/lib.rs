//! # devfarm-core
//!
//! Shared library for the DevFarm device-mirroring engine containing the
//! scrcpy wire codec, device identity types, and the iOS gesture rules.
//!
//! This crate is used by both the streaming engine and the web bridge.
//! It has zero dependencies on OS APIs, processes, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! DevFarm lets several people watch and drive Android emulators and iOS
//! simulators from a browser.  Android video comes from the scrcpy companion
//! server running on the device; iOS "video" is a rapid sequence of
//! screenshots.  This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel between the host and the on-device
//!   scrcpy server.  Video arrives as a 12-byte metadata preamble followed by
//!   repeating 12-byte packet headers and payloads; input goes back as fixed
//!   big-endian control messages.
//!
//! - **`domain`** – Pure rules with no OS dependencies: which device a session
//!   belongs to, how browser input events are shaped, and how an iOS pointer
//!   press/release pair becomes a tap or a swipe in logical points.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `devfarm_core::DeviceIdentity` instead of the full module path.
pub use domain::device::{DeviceIdentity, DeviceMetrics, Platform, ScreenDimensions};
pub use domain::frame::{FrameKind, VideoFrame};
pub use domain::gesture::{Gesture, PointScale, TouchGestureState};
pub use domain::input::{InputEvent, KeyAction, TouchAction};
pub use protocol::control::ControlMessage;
pub use protocol::scrcpy::{FrameHeader, ScrcpyCodecError, VideoMetadata};
