//! devfarm-web-bridge library crate.
//!
//! Browsers cannot speak `adb` or scrcpy.  This crate exposes the streaming
//! engine over WebSockets: video frames go out as binary messages, input
//! comes back as small JSON objects.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (binary frames out, JSON input in)
//!         ↕
//! [devfarm-web-bridge]
//!   ├── domain/           BridgeConfig, browser JSON message types
//!   ├── application/      JSON → InputEvent, URL path → Route
//!   └── infrastructure/
//!         └── ws_server/  accept loop, FrameSink/InputSource over WebSocket
//!         ↕
//! devfarm-engine (StreamingEngine)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `devfarm-core` only.
//! - `infrastructure` wires everything to `tokio-tungstenite` and the engine.

/// Domain layer: configuration and message types (no I/O).
pub mod domain;

/// Application layer: message translation and route parsing.
pub mod application;

/// Infrastructure layer: the WebSocket server.
pub mod infrastructure;
