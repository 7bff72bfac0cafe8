//! Domain layer for devfarm-web-bridge.
//!
//! Plain data: what the bridge is configured with and what the browser sends.
//! Nothing here touches a socket or a device.

pub mod config;
pub mod messages;

pub use config::BridgeConfig;
pub use messages::{ClientMessage, ErrorNotice};
