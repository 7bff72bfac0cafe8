//! Error type shared by every engine operation.
//!
//! Lifecycle calls (`start`, `attach_connection`, install) surface these to
//! the caller.  Per-frame and per-event failures inside a running stream are
//! absorbed where they happen and never reach this type's consumers.

use std::path::PathBuf;

use devfarm_core::DeviceIdentity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A required host tool is not on `PATH` (or the scrcpy server jar is
    /// missing).
    #[error("required tool not found: {tool}")]
    MissingDependency { tool: String },

    /// The device is not running and could not be started.
    #[error("device unavailable: {identity}: {reason}")]
    DeviceUnavailable {
        identity: DeviceIdentity,
        reason: String,
    },

    /// A bounded wait for boot or emulator registration ran out.
    #[error("{what} timed out after {attempts} polls")]
    BootTimeout { what: String, attempts: u32 },

    /// The companion server never sent its handshake byte.
    #[error("scrcpy handshake failed: {0}")]
    HandshakeFailed(String),

    /// More than one running instance maps to the same logical device.
    #[error("device {name} maps to several serials: {serials:?}")]
    AmbiguousDevice { name: String, serials: Vec<String> },

    /// A single screenshot attempt failed.
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),

    /// The remote end of a stream closed.
    #[error("stream terminated")]
    StreamTerminated,

    /// An external command ran but reported failure.
    #[error("{program} failed: {stderr}")]
    Command { program: String, stderr: String },

    /// An artifact path given for installation does not exist.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    /// Tool output could not be parsed.
    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn missing(tool: impl Into<String>) -> Self {
        EngineError::MissingDependency { tool: tool.into() }
    }

    pub(crate) fn unavailable(identity: &DeviceIdentity, reason: impl Into<String>) -> Self {
        EngineError::DeviceUnavailable {
            identity: identity.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        EngineError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
