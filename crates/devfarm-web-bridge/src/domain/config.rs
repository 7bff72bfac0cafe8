//! Bridge configuration.
//!
//! [`BridgeConfig`] combines the listener address with the engine tunables.
//! `main.rs` fills it from the command line, the environment, and an
//! optional TOML file; tests build it directly.

use std::net::SocketAddr;

use devfarm_engine::EngineConfig;

/// Default WebSocket port.
pub const DEFAULT_WS_PORT: u16 = 8765;

/// All runtime configuration for the bridge.
///
/// ```rust
/// use devfarm_web_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8765);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the WebSocket server binds to.
    ///
    /// `0.0.0.0` accepts connections on every interface; `127.0.0.1` keeps
    /// the bridge local.
    pub ws_bind_addr: SocketAddr,

    /// Scrcpy, emulator, and capture tunables passed to the engine.
    pub engine: EngineConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)),
            engine: EngineConfig::default(),
        }
    }
}
