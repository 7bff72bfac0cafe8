//! DevFarm WebSocket bridge: entry point.
//!
//! Serves emulator and simulator screens to browsers.  Each WebSocket path
//! names one device:
//!
//! ```text
//! ws://HOST:PORT/stream/android/<avd-name>   H.264 packets out, JSON input in
//! ws://HOST:PORT/stream/ios/<udid>           JPEG frames out, JSON input in
//! ws://HOST:PORT/logs/<platform>/<id>        log lines out
//! ```
//!
//! # Usage
//!
//! ```text
//! devfarm-web-bridge [OPTIONS]
//!
//! Options:
//!   --ws-port     <PORT>   WebSocket listener port [default: 8765]
//!   --ws-bind     <ADDR>   Listener address [default: 0.0.0.0]
//!   --server-path <PATH>   scrcpy server jar
//!   --config      <PATH>   Engine TOML configuration
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable             | Default    | Description                  |
//! |----------------------|------------|------------------------------|
//! | `DEVFARM_WS_PORT`    | `8765`     | WebSocket listener port      |
//! | `DEVFARM_WS_BIND`    | `0.0.0.0`  | Listener address             |
//! | `SCRCPY_SERVER_PATH` | (search)   | scrcpy server jar            |
//! | `DEVFARM_CONFIG`     | (none)     | Engine TOML configuration    |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devfarm_engine::{load_config, EngineConfig, StreamingEngine};
use devfarm_web_bridge::domain::config::DEFAULT_WS_PORT;
use devfarm_web_bridge::domain::BridgeConfig;
use devfarm_web_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DevFarm WebSocket bridge.
#[derive(Debug, Parser)]
#[command(
    name = "devfarm-web-bridge",
    about = "Streams Android emulators and iOS simulators to browsers over WebSocket",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server.
    #[arg(long, default_value_t = DEFAULT_WS_PORT, env = "DEVFARM_WS_PORT")]
    ws_port: u16,

    /// IP address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0", env = "DEVFARM_WS_BIND")]
    ws_bind: String,

    /// Path to the scrcpy server jar pushed to emulators.
    ///
    /// Overrides `scrcpy.server_path` from the config file.  Without either,
    /// the usual locations under the working directory are searched.
    #[arg(long = "server-path", env = "SCRCPY_SERVER_PATH")]
    scrcpy_server_path: Option<PathBuf>,

    /// Engine configuration file (TOML).  A missing file means defaults.
    #[arg(long, env = "DEVFARM_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` is not an IP address or the config
    /// file cannot be read or parsed.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ws_bind_addr: SocketAddr = format!("{}:{}", self.ws_bind, self.ws_port)
            .parse()
            .with_context(|| {
                format!("invalid WebSocket bind address: '{}:{}'", self.ws_bind, self.ws_port)
            })?;

        let mut engine = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(server_path) = self.scrcpy_server_path {
            engine.scrcpy.server_path = Some(server_path);
        }

        Ok(BridgeConfig { ws_bind_addr, engine })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;
    info!("DevFarm WebSocket bridge starting on ws://{}", config.ws_bind_addr);

    let engine = Arc::new(StreamingEngine::with_system_tools(config.engine.clone()));
    let report = engine.startup_scan().await;
    if !report.missing_tools.is_empty() {
        warn!(
            "missing host tools: {}; affected platforms will refuse connections",
            report.missing_tools.join(", ")
        );
    }
    if let Some(mapping) = &report.avd_mapping {
        let emulators: usize = mapping.values().map(Vec::len).sum();
        info!("{emulators} running emulator(s) mapped to AVDs");
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let result = run_server(config, Arc::clone(&engine), running).await;
    engine.stop_all().await;

    info!("DevFarm WebSocket bridge stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_produce_correct_ws_port() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["devfarm-web-bridge"]);

        // Assert
        assert_eq!(cli.ws_port, 8765);
    }

    #[test]
    fn test_cli_defaults_bind_all_interfaces() {
        let cli = Cli::parse_from(["devfarm-web-bridge"]);
        assert_eq!(cli.ws_bind, "0.0.0.0");
    }

    #[test]
    fn test_cli_ws_port_override() {
        let cli = Cli::parse_from(["devfarm-web-bridge", "--ws-port", "9999"]);
        assert_eq!(cli.ws_port, 9999);
    }

    #[test]
    fn test_cli_server_path_override() {
        let cli = Cli::parse_from(["devfarm-web-bridge", "--server-path", "/opt/scrcpy-server"]);
        assert_eq!(cli.scrcpy_server_path, Some(PathBuf::from("/opt/scrcpy-server")));
    }

    #[test]
    fn test_into_bridge_config_defaults() {
        // Arrange
        let cli = Cli::parse_from(["devfarm-web-bridge"]);

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.ws_bind_addr.to_string(), "0.0.0.0:8765");
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_into_bridge_config_custom_bind() {
        let args = ["devfarm-web-bridge", "--ws-bind", "127.0.0.1", "--ws-port", "7000"];
        let cli = Cli::parse_from(args);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.ws_bind_addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_into_bridge_config_invalid_bind_returns_error() {
        let cli = Cli::parse_from(["devfarm-web-bridge", "--ws-bind", "not-an-ip"]);
        let result = cli.into_bridge_config();
        assert!(result.is_err(), "hostname is not a valid bind address");
    }

    #[test]
    fn test_into_bridge_config_server_path_overrides_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devfarm.toml");
        std::fs::write(&path, "[scrcpy]\nserver_path = \"/from/file\"\nmax_size = 1024\n").unwrap();
        let cli = Cli::parse_from([
            "devfarm-web-bridge",
            "--config",
            path.to_str().unwrap(),
            "--server-path",
            "/from/cli",
        ]);

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.engine.scrcpy.server_path, Some(PathBuf::from("/from/cli")));
        assert_eq!(config.engine.scrcpy.max_size, 1024);
    }

    #[test]
    fn test_into_bridge_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cli = Cli::parse_from(["devfarm-web-bridge", "--config", path.to_str().unwrap()]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_into_bridge_config_malformed_file_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[ios\nmax_fps = ").unwrap();
        let cli = Cli::parse_from(["devfarm-web-bridge", "--config", path.to_str().unwrap()]);
        assert!(cli.into_bridge_config().is_err());
    }
}
