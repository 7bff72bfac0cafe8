//! Domain entities for DevFarm.
//!
//! This module contains pure rules with no infrastructure dependencies.
//!
//! # Why keep these separate? (for beginners)
//!
//! The engine talks to `adb`, `xcrun`, `idb`, and TCP sockets.  None of that
//! is needed to decide whether a press/release pair is a tap, or which pixel a
//! normalised browser coordinate lands on.  Keeping those rules here means
//! they compile and test on any machine, with no emulator or simulator around.

/// Device identity, platform tag, and cached screen metrics.
pub mod device;

/// Video frames as they leave a device stream.
pub mod frame;

/// iOS press/release classification and pixel-to-point scaling.
pub mod gesture;

/// Input events decoded from a browser connection.
pub mod input;
