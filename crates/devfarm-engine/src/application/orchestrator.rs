//! Runs one client connection against one device stream.
//!
//! # How a connection runs (for beginners)
//!
//! A connection has two directions that make progress independently:
//!
//! ```text
//!   DeviceStream ──next_frame──▶ pump_video ──send_frame──▶ FrameSink
//!   InputSource  ──next_event──▶ pump_input ──inject_*───▶ DeviceStream
//! ```
//!
//! Each direction runs as its own task.  The connection ends as soon as
//! *either* finishes: the client hanging up ends the input pump, the device
//! going away ends the video pump.  The other task is then aborted and
//! awaited, so when [`run_connection`] returns neither pump is still
//! touching the stream or the sink.

use std::sync::Arc;

use devfarm_core::domain::input::to_device_pixels;
use devfarm_core::InputEvent;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device_stream::{DeviceStream, FrameSink, InputSource};
use crate::error::EngineError;

/// Which half of the connection finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Video,
    Input,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// One side ended normally (device stream over or client gone).
    Ok { ended_by: Direction },
    /// Startup or a direction failed.
    Error { reason: String },
}

impl ConnectionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

type PumpResult = Result<(), EngineError>;

/// Pumps frames and input until either side ends, then tears both down.
///
/// The sink is closed before returning.  The stream itself is left running;
/// stopping it is the caller's decision.
pub async fn run_connection(
    stream: Arc<dyn DeviceStream>,
    sink: Arc<dyn FrameSink>,
    input: Box<dyn InputSource>,
) -> ConnectionOutcome {
    let connection_id = Uuid::new_v4();
    let device = stream.identity().clone();
    info!(%connection_id, %device, "connection started");

    let mut video = tokio::spawn(pump_video(Arc::clone(&stream), Arc::clone(&sink)));
    let mut inbound = tokio::spawn(pump_input(Arc::clone(&stream), input));

    let (direction, result) = tokio::select! {
        r = &mut video => (Direction::Video, r),
        r = &mut inbound => (Direction::Input, r),
    };
    let loser = match direction {
        Direction::Video => inbound,
        Direction::Input => video,
    };
    stop_task(loser).await;
    sink.close().await;

    let outcome = match result {
        Ok(Ok(())) | Ok(Err(EngineError::StreamTerminated)) => {
            ConnectionOutcome::Ok { ended_by: direction }
        }
        Ok(Err(e)) => ConnectionOutcome::Error { reason: e.to_string() },
        Err(join) => ConnectionOutcome::Error {
            reason: format!("{direction:?} task failed: {join}"),
        },
    };
    match &outcome {
        ConnectionOutcome::Ok { ended_by } => {
            info!(%connection_id, %device, ?ended_by, "connection closed")
        }
        ConnectionOutcome::Error { reason } => {
            warn!(%connection_id, %device, %reason, "connection failed")
        }
    }
    outcome
}

async fn stop_task(handle: JoinHandle<PumpResult>) {
    handle.abort();
    // Cancelled or finished, either way it no longer runs.
    let _ = handle.await;
}

/// Forwards frames until the stream ends or the sink refuses one.
async fn pump_video(stream: Arc<dyn DeviceStream>, sink: Arc<dyn FrameSink>) -> PumpResult {
    let mut sent = 0u64;
    while let Some(frame) = stream.next_frame().await? {
        if sink.send_frame(frame).await.is_err() {
            debug!(device = %stream.identity(), sent, "client stopped accepting frames");
            return Err(EngineError::StreamTerminated);
        }
        sent += 1;
    }
    debug!(device = %stream.identity(), sent, "device stream ended");
    Ok(())
}

/// Applies client input until the client goes away.
async fn pump_input(stream: Arc<dyn DeviceStream>, mut input: Box<dyn InputSource>) -> PumpResult {
    while let Some(event) = input.next_event().await? {
        apply_input(stream.as_ref(), event).await;
    }
    Ok(())
}

/// Injects one browser event.  Touch coordinates are normalised to device
/// pixels using the stream's current size.
pub async fn apply_input(stream: &dyn DeviceStream, event: InputEvent) {
    match event {
        InputEvent::Touch { action, x, y } => {
            let (width, height) = stream.metrics().pixel_size();
            let (px, py) = to_device_pixels(x, y, width, height);
            stream.inject_touch(action, px, py).await;
        }
        InputEvent::Key { action, keycode } => stream.inject_key(action, keycode).await,
        InputEvent::Home => stream.go_home().await,
    }
}
