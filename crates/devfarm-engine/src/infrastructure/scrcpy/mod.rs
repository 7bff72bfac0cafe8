//! scrcpy companion-server client.
//!
//! # How a scrcpy session is wired (for beginners)
//!
//! ```text
//! host                                   device
//! ────                                   ──────
//! adb push scrcpy-server.jar  ────────►  /data/local/tmp/scrcpy-server.jar
//! adb forward tcp:P localabstract:scrcpy
//! adb shell app_process ... Server  ──►  server starts, listens on "scrcpy"
//! connect 127.0.0.1:P  (video)   ◄────►  accept #1, sends 1 dummy byte
//! connect 127.0.0.1:P  (control) ◄────►  accept #2
//!                                ◄─────  12-byte metadata, then packets
//! control messages               ──────►
//! ```
//!
//! `adb forward` accepts the TCP connection on the host side even when
//! nothing listens on the device yet, which is why the dummy byte, not the
//! connect, proves the server is up.

pub mod client;
pub mod control;
pub mod demux;

pub use client::ScrcpyClient;
pub use control::{ControlChannel, DetachedControl, TcpControlChannel};
