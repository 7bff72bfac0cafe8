//! `ScrcpyClient`: one emulator's video and input over the companion server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use devfarm_core::protocol::control::KEYCODE_HOME;
use devfarm_core::{
    ControlMessage, DeviceIdentity, DeviceMetrics, KeyAction, TouchAction, VideoFrame,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::control::{ControlChannel, DetachedControl, TcpControlChannel};
use super::demux::{DemuxEvent, VideoDemuxer};
use crate::application::device_stream::DeviceStream;
use crate::domain::config::{ScrcpyConfig, DEVICE_SERVER_PATH};
use crate::error::EngineError;
use crate::infrastructure::adb::{Adb, ADB};
use crate::infrastructure::tools::{as_strs, ProcessHandle, SpawnMode};

/// Live scrcpy session for one emulator.
///
/// Owns the video socket, the control channel, the server process, and the
/// port forward.  [`DeviceStream::shutdown`] releases all four, in that
/// order.
pub struct ScrcpyClient {
    identity: DeviceIdentity,
    serial: String,
    adb: Adb,
    video: Mutex<Option<VideoDemuxer<TcpStream>>>,
    control: Arc<dyn ControlChannel>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    forward_port: StdMutex<Option<u16>>,
    metrics: StdMutex<DeviceMetrics>,
    shutdown_tx: watch::Sender<bool>,
    alive: AtomicBool,
    torn_down: AtomicBool,
}

/// Resources acquired so far during startup, released if a later step fails.
struct PendingResources {
    adb: Adb,
    serial: String,
    forward_port: Option<u16>,
    process: Option<Box<dyn ProcessHandle>>,
}

impl PendingResources {
    async fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate().await;
        }
        if let Some(port) = self.forward_port.take() {
            if let Err(e) = self.adb.forward_remove(&self.serial, port).await {
                debug!(serial = %self.serial, port, error = %e, "forward removal failed");
            }
        }
    }
}

impl ScrcpyClient {
    /// Pushes and starts the companion server on `serial`, then connects.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MissingDependency`] when `adb` or the server jar is
    ///   missing.
    /// - [`EngineError::Command`] when push or forward fails.
    /// - [`EngineError::HandshakeFailed`] when the server never answers.
    ///
    /// Anything acquired before the failing step is released.
    pub async fn launch(
        adb: Adb,
        identity: DeviceIdentity,
        serial: &str,
        config: &ScrcpyConfig,
    ) -> Result<Self, EngineError> {
        adb.runner().ensure_available(ADB)?;

        let seed = match adb.physical_size(serial).await {
            Ok(Some(size)) => size,
            Ok(None) | Err(_) => {
                debug!(serial, "wm size unavailable, using default seed size");
                (config.seed_width, config.seed_height)
            }
        };

        let server = config.resolve_server_path(&std::env::current_dir()?)?;
        adb.push(serial, &server, DEVICE_SERVER_PATH).await?;

        let port = allocate_local_port().await?;
        adb.forward(serial, port, &config.socket_name).await?;

        let mut pending = PendingResources {
            adb: adb.clone(),
            serial: serial.to_string(),
            forward_port: Some(port),
            process: None,
        };

        let (video, control) = match start_server(&mut pending, port, config).await {
            Ok(sockets) => sockets,
            Err(e) => {
                pending.release().await;
                return Err(e);
            }
        };

        info!(
            device = %identity,
            serial,
            port,
            control = !matches!(control, Connected::Detached),
            "scrcpy session started"
        );

        let control: Arc<dyn ControlChannel> = match control {
            Connected::Socket(stream) => Arc::new(TcpControlChannel::new(serial, stream)),
            Connected::Detached => Arc::new(DetachedControl),
        };
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            identity,
            serial: serial.to_string(),
            adb,
            video: Mutex::new(Some(VideoDemuxer::new(video))),
            control,
            process: Mutex::new(pending.process.take()),
            forward_port: StdMutex::new(pending.forward_port.take()),
            metrics: StdMutex::new(DeviceMetrics::from_pixels(seed.0, seed.1)),
            shutdown_tx,
            alive: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether input reaches the device.
    pub async fn has_control(&self) -> bool {
        self.control.is_attached().await
    }

    fn learn_size(&self, width: u32, height: u32) {
        if let Ok(mut metrics) = self.metrics.lock() {
            if metrics.learn_pixels(width, height) {
                debug!(serial = %self.serial, width, height, "screen size updated from stream");
            }
        }
    }

    fn mark_ended(&self, reason: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!(serial = %self.serial, reason, "video stream ended");
        }
    }
}

enum Connected {
    Socket(TcpStream),
    Detached,
}

/// Launches the server and opens both sockets.
async fn start_server(
    pending: &mut PendingResources,
    port: u16,
    config: &ScrcpyConfig,
) -> Result<(TcpStream, Connected), EngineError> {
    let classpath = format!("CLASSPATH={DEVICE_SERVER_PATH}");
    let server_args = config.server_args();
    let mut args = vec!["-s", pending.serial.as_str(), "shell", classpath.as_str(), "app_process"];
    args.extend(as_strs(&server_args));
    let process = pending
        .adb
        .runner()
        .spawn(ADB, &args, SpawnMode::CaptureStderr)
        .await?;
    pending.process = Some(process);

    tokio::time::sleep(config.launch_grace()).await;

    let (attempts, backoff) = (config.connect_attempts, config.connect_backoff());
    let mut video = match connect_with_retry(port, attempts, backoff).await {
        Ok(stream) => stream,
        Err(e) => {
            return Err(handshake_failure(pending, format!("video socket: {e}")).await);
        }
    };

    let mut dummy = [0u8; 1];
    match tokio::time::timeout(config.handshake_timeout(), video.read_exact(&mut dummy)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            drop(video);
            return Err(handshake_failure(pending, format!("handshake read: {e}")).await);
        }
        Err(_) => {
            drop(video);
            let reason = format!("no handshake byte within {:?}", config.handshake_timeout());
            return Err(handshake_failure(pending, reason).await);
        }
    }

    let control = match connect_with_retry(port, attempts, backoff).await {
        Ok(stream) => Connected::Socket(stream),
        Err(e) => {
            warn!(
                serial = %pending.serial,
                error = %e,
                "control socket unavailable, input disabled"
            );
            Connected::Detached
        }
    };

    Ok((video, control))
}

/// Stops the server and logs whatever it printed.
async fn handshake_failure(pending: &mut PendingResources, reason: String) -> EngineError {
    if let Some(process) = pending.process.as_mut() {
        process.terminate().await;
        let stderr = process.stderr_output();
        error!(
            serial = %pending.serial,
            %reason,
            stderr = %stderr.trim(),
            "scrcpy server failed to start"
        );
    } else {
        error!(serial = %pending.serial, %reason, "scrcpy server failed to start");
    }
    EngineError::HandshakeFailed(reason)
}

async fn connect_with_retry(
    port: u16,
    attempts: u32,
    backoff: Duration,
) -> std::io::Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                debug!(port, attempt, error = %e, "connect failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("no connect attempts")))
}

/// Asks the OS for a free loopback port.
pub(crate) async fn allocate_local_port() -> Result<u16, EngineError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

#[async_trait]
impl DeviceStream for ScrcpyClient {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn next_frame(&self) -> Result<Option<VideoFrame>, EngineError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(None);
        }
        let mut guard = self.video.lock().await;
        let Some(demux) = guard.as_mut() else {
            return Ok(None);
        };

        loop {
            let event = tokio::select! {
                event = demux.next_event() => event,
                _ = shutdown_rx.changed() => return Ok(None),
            };
            match event {
                Ok(DemuxEvent::Metadata(meta)) => self.learn_size(meta.width, meta.height),
                Ok(DemuxEvent::Frame(frame)) => return Ok(Some(frame)),
                Ok(DemuxEvent::End) => {
                    self.mark_ended("server closed the video socket");
                    *guard = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.mark_ended("video read error");
                    *guard = None;
                    return Err(e);
                }
            }
        }
    }

    async fn inject_touch(&self, action: TouchAction, x: i32, y: i32) {
        let (width, height) = self.metrics().pixel_size();
        self.control
            .send(ControlMessage::touch(action, x, y, width, height))
            .await;
    }

    async fn inject_key(&self, action: KeyAction, keycode: i32) {
        self.control.send(ControlMessage::key(action, keycode)).await;
    }

    async fn go_home(&self) {
        self.inject_key(KeyAction::Down, KEYCODE_HOME).await;
        self.inject_key(KeyAction::Up, KEYCODE_HOME).await;
    }

    fn metrics(&self) -> DeviceMetrics {
        self.metrics
            .lock()
            .map(|m| *m)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        // Sockets first: the signal above makes any reader drop the lock.
        self.video.lock().await.take();
        self.control.close().await;

        if let Some(mut process) = self.process.lock().await.take() {
            process.terminate().await;
        }

        let port = self.forward_port.lock().ok().and_then(|mut p| p.take());
        if let Some(port) = port {
            if let Err(e) = self.adb.forward_remove(&self.serial, port).await {
                debug!(serial = %self.serial, port, error = %e, "forward removal failed");
            }
        }
        info!(device = %self.identity, serial = %self.serial, "scrcpy session closed");
    }
}
