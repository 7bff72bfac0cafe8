//! Application layer: device managers, the session registry, and the
//! per-connection orchestrator.

/// Trait seams between device streams and client connections.
pub mod device_stream;

/// Facade that routes every operation by platform.
pub mod engine;

pub mod android_manager;
pub mod ios_manager;
pub mod log_streams;

/// Races the video and input directions of one connection.
pub mod orchestrator;

/// At most one live stream per device identity.
pub mod session_registry;

/// In-memory doubles for the trait seams, shared by unit and integration
/// tests.
pub mod mock;
