//! Engine configuration and the handles the engine hands out.

/// Tunables for scrcpy, emulator lifecycle, and the iOS capture loop.
pub mod config;

/// Handles describing running devices.
pub mod handles;
