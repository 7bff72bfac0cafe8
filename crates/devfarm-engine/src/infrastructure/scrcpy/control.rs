//! The optional control socket.
//!
//! Video works without control, so the client always holds *some*
//! [`ControlChannel`]: a live socket, or [`DetachedControl`] that drops
//! everything.  Callers never check which.

use async_trait::async_trait;
use devfarm_core::ControlMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Sends `message`, swallowing failures.
    async fn send(&self, message: ControlMessage);

    /// `true` while messages actually reach the device.
    async fn is_attached(&self) -> bool;

    async fn close(&self);
}

/// Control channel over the forwarded TCP socket.
pub struct TcpControlChannel {
    serial: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpControlChannel {
    pub fn new(serial: impl Into<String>, stream: TcpStream) -> Self {
        Self {
            serial: serial.into(),
            stream: Mutex::new(Some(stream)),
        }
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn send(&self, message: ControlMessage) {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return;
        };
        if let Err(e) = stream.write_all(&message.encode()).await {
            // The server is gone; further writes would fail the same way.
            warn!(serial = %self.serial, error = %e, "control socket write failed, detaching");
            *guard = None;
        }
    }

    async fn is_attached(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
            debug!(serial = %self.serial, "control socket closed");
        }
    }
}

/// Stand-in used when the control socket could not be opened.
#[derive(Debug, Default)]
pub struct DetachedControl;

#[async_trait]
impl ControlChannel for DetachedControl {
    async fn send(&self, _message: ControlMessage) {}

    async fn is_attached(&self) -> bool {
        false
    }

    async fn close(&self) {}
}
