//! In-memory doubles for the stream, sink, and input seams.
//!
//! These mirror what a real emulator and a real browser do, minus the
//! processes and sockets, so the orchestrator and registry can be exercised
//! deterministically:
//!
//! - [`FakeStream`] yields queued frames, then either ends or blocks until
//!   shut down (a "never-yielding" source), and records every injection.
//! - [`RecordingSink`] records frames, error messages, and whether it was
//!   closed.
//! - [`ScriptedInput`] replays a list of events, then ends or blocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use devfarm_core::{DeviceIdentity, DeviceMetrics, InputEvent, KeyAction, TouchAction, VideoFrame};
use tokio::sync::Notify;

use super::device_stream::{DeviceStream, FrameSink, InputSource};
use crate::error::EngineError;

/// One call recorded by [`FakeStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    Touch(TouchAction, i32, i32),
    Key(KeyAction, i32),
    Home,
}

pub struct FakeStream {
    identity: DeviceIdentity,
    frames: Mutex<VecDeque<VideoFrame>>,
    end_when_empty: bool,
    metrics: Mutex<DeviceMetrics>,
    alive: AtomicBool,
    stopped: Notify,
    /// Every injection, in order.
    pub injected: Mutex<Vec<Injected>>,
    /// How many times `shutdown` ran.
    pub shutdowns: AtomicUsize,
}

impl FakeStream {
    /// A 720x1280 stream with no frames that blocks until shut down.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            frames: Mutex::new(VecDeque::new()),
            end_when_empty: false,
            metrics: Mutex::new(DeviceMetrics::from_pixels(720, 1280)),
            alive: AtomicBool::new(true),
            stopped: Notify::new(),
            injected: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// A stream that yields `frames` and then ends.
    pub fn with_frames(identity: DeviceIdentity, frames: Vec<VideoFrame>) -> Self {
        let mut stream = Self::new(identity);
        stream.frames = Mutex::new(frames.into());
        stream.end_when_empty = true;
        stream
    }

    pub fn set_pixels(&self, width: u32, height: u32) {
        if let Ok(mut m) = self.metrics.lock() {
            m.learn_pixels(width, height);
        }
    }

    pub fn injected(&self) -> Vec<Injected> {
        self.injected.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(&self, call: Injected) {
        if let Ok(mut v) = self.injected.lock() {
            v.push(call);
        }
    }
}

#[async_trait]
impl DeviceStream for FakeStream {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn next_frame(&self) -> Result<Option<VideoFrame>, EngineError> {
        if !self.is_alive() {
            return Ok(None);
        }
        let next = self.frames.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(frame) => Ok(Some(frame)),
            None if self.end_when_empty => Ok(None),
            None => {
                let stopped = self.stopped.notified();
                if !self.is_alive() {
                    return Ok(None);
                }
                stopped.await;
                Ok(None)
            }
        }
    }

    async fn inject_touch(&self, action: TouchAction, x: i32, y: i32) {
        self.record(Injected::Touch(action, x, y));
    }

    async fn inject_key(&self, action: KeyAction, keycode: i32) {
        self.record(Injected::Key(action, keycode));
    }

    async fn go_home(&self) {
        self.record(Injected::Home);
    }

    fn metrics(&self) -> DeviceMetrics {
        self.metrics
            .lock()
            .map(|m| *m)
            .unwrap_or_else(|_| DeviceMetrics::from_pixels(720, 1280))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        self.stopped.notify_waiters();
    }
}

/// Records everything sent to the client.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<VideoFrame>>,
    pub errors: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    /// When set, `send_frame` fails once this many frames were accepted.
    pub fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&self, frame: VideoFrame) -> Result<(), EngineError> {
        let mut frames = self.frames.lock().map_err(|_| EngineError::StreamTerminated)?;
        if self.fail_after.is_some_and(|n| frames.len() >= n) {
            return Err(EngineError::StreamTerminated);
        }
        frames.push(frame);
        Ok(())
    }

    async fn send_error(&self, reason: &str) -> Result<(), EngineError> {
        if let Ok(mut e) = self.errors.lock() {
            e.push(reason.to_string());
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Replays fixed events.
pub struct ScriptedInput {
    events: VecDeque<InputEvent>,
    hang_when_done: bool,
}

impl ScriptedInput {
    /// Yields `events`, then reports the client gone.
    pub fn ending(events: Vec<InputEvent>) -> Self {
        Self {
            events: events.into(),
            hang_when_done: false,
        }
    }

    /// Yields `events`, then never yields again.
    pub fn hanging(events: Vec<InputEvent>) -> Self {
        Self {
            events: events.into(),
            hang_when_done: true,
        }
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_event(&mut self) -> Result<Option<InputEvent>, EngineError> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.hang_when_done => std::future::pending().await,
            None => Ok(None),
        }
    }
}
