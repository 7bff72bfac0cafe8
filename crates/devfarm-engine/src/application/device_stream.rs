//! The seams between a device stream and a client connection.
//!
//! A [`DeviceStream`] produces frames and accepts input for one device.  A
//! [`FrameSink`] and an [`InputSource`] are the two halves of one client
//! connection.  The orchestrator only ever sees these traits, so the same
//! race-and-teardown logic serves Android and iOS, and tests can plug in
//! in-memory doubles.

use async_trait::async_trait;
use devfarm_core::{DeviceIdentity, DeviceMetrics, InputEvent, KeyAction, TouchAction, VideoFrame};

use crate::error::EngineError;

/// A live video/input stream for one device.
#[async_trait]
pub trait DeviceStream: Send + Sync {
    fn identity(&self) -> &DeviceIdentity;

    /// Waits for the next frame.  `Ok(None)` means the stream has ended.
    async fn next_frame(&self) -> Result<Option<VideoFrame>, EngineError>;

    /// Injects a pointer event at device-pixel coordinates.  Best-effort.
    async fn inject_touch(&self, action: TouchAction, x: i32, y: i32);

    /// Injects a key event.  Best-effort.
    async fn inject_key(&self, action: KeyAction, keycode: i32);

    /// Presses the home button.  Best-effort.
    async fn go_home(&self);

    /// Last-known screen metrics.
    fn metrics(&self) -> DeviceMetrics;

    /// `false` once the stream has ended or been shut down.
    fn is_alive(&self) -> bool;

    /// Releases everything the stream owns.  Idempotent.
    async fn shutdown(&self);
}

/// Outgoing half of a client connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: VideoFrame) -> Result<(), EngineError>;

    /// Sends one structured error message.
    async fn send_error(&self, reason: &str) -> Result<(), EngineError>;

    async fn close(&self);
}

/// Incoming half of a client connection.
#[async_trait]
pub trait InputSource: Send {
    /// The next decoded event, or `Ok(None)` when the client has gone.
    async fn next_event(&mut self) -> Result<Option<InputEvent>, EngineError>;
}
