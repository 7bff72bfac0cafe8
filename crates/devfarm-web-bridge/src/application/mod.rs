//! Application layer for devfarm-web-bridge.
//!
//! Pure translation between what the browser sends and what the engine
//! understands.  No sockets here, so every rule is unit-testable.

pub mod bridge_service;

pub use bridge_service::{
    error_notice_json, parse_client_message, parse_route, translate_client_message, BridgeError,
    Route,
};
