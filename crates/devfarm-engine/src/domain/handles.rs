//! Handles describing running devices.

use serde::Serialize;

/// A running Android emulator resolved from its AVD name.
///
/// At most one exists per AVD; seeing two serials for one name is reported as
/// [`EngineError::AmbiguousDevice`](crate::EngineError::AmbiguousDevice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmulatorHandle {
    pub avd_name: String,
    /// Transport serial, e.g. `emulator-5554`.
    pub serial: String,
    /// Console port encoded in the serial.
    pub console_port: Option<u16>,
    /// Process id when this engine spawned the emulator.
    pub pid: Option<u32>,
    /// `true` when the emulator was already running before the call.
    pub reused: bool,
}

impl EmulatorHandle {
    pub fn new(avd_name: impl Into<String>, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        Self {
            avd_name: avd_name.into(),
            console_port: console_port_from_serial(&serial),
            serial,
            pid: None,
            reused: false,
        }
    }
}

/// Extracts `5554` from `emulator-5554`.
pub fn console_port_from_serial(serial: &str) -> Option<u16> {
    serial.strip_prefix("emulator-")?.parse().ok()
}
