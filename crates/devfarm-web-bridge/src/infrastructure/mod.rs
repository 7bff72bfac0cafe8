//! Infrastructure layer for devfarm-web-bridge.
//!
//! All socket I/O lives here: the WebSocket accept loop, the adapters that
//! let the engine write frames to and read input from a browser, and the log
//! line forwarder.
//!
//! # What does NOT belong here?
//!
//! - JSON and route parsing (application layer)
//! - Message type definitions (domain layer)
//! - CLI parsing (`main.rs`)

pub mod ws_server;

pub use ws_server::{run_server, serve};
