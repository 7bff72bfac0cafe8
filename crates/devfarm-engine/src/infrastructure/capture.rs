//! iOS pseudo-video: paced screenshots re-encoded as JPEG.
//!
//! The simulator exposes no video socket, so each frame is a fresh PNG
//! screenshot from `simctl`, decoded and re-encoded as a moderate-quality
//! JPEG on the blocking pool.  Pointer input becomes discrete `idb ui`
//! commands through [`TouchGestureState`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use devfarm_core::{
    DeviceIdentity, DeviceMetrics, Gesture, KeyAction, PointScale, ScreenDimensions, TouchAction,
    TouchGestureState, VideoFrame,
};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::device_stream::DeviceStream;
use crate::domain::config::IosConfig;
use crate::error::EngineError;
use crate::infrastructure::simctl::{Idb, Simctl, XCRUN};
use crate::infrastructure::tools::SharedRunner;

/// Pixel size assumed before the first screenshot arrives.
const SEED_SIZE: (u32, u32) = (1170, 2532);

/// Decodes any supported still image and re-encodes it as RGB JPEG.
///
/// Returns the JPEG bytes and the image's pixel size.
pub fn transcode_to_jpeg(
    image_bytes: &[u8],
    quality: u8,
) -> Result<(Vec<u8>, u32, u32), EngineError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| EngineError::CaptureFailed(format!("decode: {e}")))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let (w16, h16) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(EngineError::CaptureFailed(format!(
                "image too large for JPEG: {width}x{height}"
            )))
        }
    };
    let mut jpeg = Vec::with_capacity(rgb.as_raw().len() / 8);
    jpeg_encoder::Encoder::new(&mut jpeg, quality)
        .encode(rgb.as_raw(), w16, h16, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| EngineError::CaptureFailed(format!("encode: {e}")))?;
    Ok((jpeg, width, height))
}

/// Screenshot stream and gesture injector for one simulator.
pub struct ScreenCapture {
    identity: DeviceIdentity,
    simctl: Simctl,
    idb: Idb,
    config: IosConfig,
    scale: PointScale,
    gesture: StdMutex<TouchGestureState>,
    metrics: StdMutex<DeviceMetrics>,
    /// Earliest start of the next capture; also serialises `next_frame`.
    next_due: Mutex<Option<Instant>>,
    frames: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    alive: AtomicBool,
}

impl ScreenCapture {
    /// Builds a capture stream from an already-fetched screen description.
    pub fn new(
        runner: SharedRunner,
        identity: DeviceIdentity,
        config: IosConfig,
        dims: Option<ScreenDimensions>,
    ) -> Self {
        let metrics = match &dims {
            Some(d) => DeviceMetrics::from_screen_dimensions(d, SEED_SIZE),
            None => DeviceMetrics::from_pixels(SEED_SIZE.0, SEED_SIZE.1),
        };
        let scale = PointScale::from_dimensions(dims.as_ref());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            identity,
            simctl: Simctl::new(runner.clone()),
            idb: Idb::new(runner),
            gesture: StdMutex::new(TouchGestureState::new(config.swipe_threshold_px)),
            config,
            scale,
            metrics: StdMutex::new(metrics),
            next_due: Mutex::new(None),
            frames: AtomicU64::new(0),
            shutdown_tx,
            alive: AtomicBool::new(true),
        }
    }

    /// Queries the screen description (best-effort) and builds the stream.
    ///
    /// # Errors
    ///
    /// [`EngineError::MissingDependency`] when `xcrun` is absent.
    pub async fn open(
        runner: SharedRunner,
        identity: DeviceIdentity,
        config: IosConfig,
    ) -> Result<Self, EngineError> {
        runner.ensure_available(XCRUN)?;
        let idb = Idb::new(runner.clone());
        let dims = if idb.is_available() {
            match idb.describe(&identity.name).await {
                Ok(dims) => dims,
                Err(e) => {
                    warn!(
                        device = %identity,
                        error = %e,
                        "idb describe failed, gestures will not be rescaled"
                    );
                    None
                }
            }
        } else {
            warn!(device = %identity, "idb not installed, input disabled");
            None
        };
        let capture = Self::new(runner, identity, config, dims);
        info!(
            device = %capture.identity,
            scale_x = capture.scale.x,
            scale_y = capture.scale.y,
            "screen capture ready"
        );
        Ok(capture)
    }

    pub fn point_scale(&self) -> PointScale {
        self.scale
    }

    fn udid(&self) -> &str {
        &self.identity.name
    }

    /// PNG bytes from the pipe capture, or from the temp-file fallbacks.
    async fn capture_image(&self) -> Result<Vec<u8>, EngineError> {
        let timeout = self.config.capture_timeout();
        let pipe_err = match self.simctl.screenshot_to_stdout(self.udid(), timeout).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => e,
        };
        debug!(device = %self.identity, error = %pipe_err, "pipe capture failed, trying temp file");

        let file = tempfile::Builder::new()
            .prefix("devfarm-shot-")
            .suffix(".png")
            .tempfile()?;
        let path = file.path();

        if self.idb.is_available() {
            match self.idb.screenshot_to_file(self.udid(), path, timeout).await {
                Ok(()) => return read_nonempty(path).await,
                Err(e) => debug!(device = %self.identity, error = %e, "idb screenshot failed"),
            }
        }
        self.simctl.screenshot_to_file(self.udid(), path, timeout).await?;
        read_nonempty(path).await
    }

    async fn capture_frame(&self) -> Result<VideoFrame, EngineError> {
        let image_bytes = self.capture_image().await?;
        let quality = self.config.jpeg_quality;
        let (jpeg, width, height) =
            tokio::task::spawn_blocking(move || transcode_to_jpeg(&image_bytes, quality))
                .await
            .map_err(|e| EngineError::CaptureFailed(format!("transcode task: {e}")))??;
        if let Ok(mut metrics) = self.metrics.lock() {
            if metrics.learn_pixels(width, height) {
                debug!(device = %self.identity, width, height, "screen size learned from capture");
            }
        }
        Ok(VideoFrame::still(jpeg))
    }

    /// Sends the gesture in the background so the input pump never waits on `idb`.
    fn run_gesture(&self, gesture: Gesture) {
        let scaled = gesture.scaled(&self.scale);
        let idb = self.idb.clone();
        let identity = self.identity.clone();
        let duration = self.config.swipe_duration_secs;
        tokio::spawn(async move {
            let udid = identity.name.as_str();
            let result = match scaled {
                Gesture::Tap { x, y } => idb.tap(udid, x, y).await,
                Gesture::Swipe {
                    from_x,
                    from_y,
                    to_x,
                    to_y,
                } => idb.swipe(udid, (from_x, from_y), (to_x, to_y), duration).await,
            };
            match result {
                Ok(()) => debug!(device = %identity, ?scaled, "gesture sent"),
                Err(e) => warn!(device = %identity, error = %e, "gesture failed"),
            }
        });
    }
}

async fn read_nonempty(path: &std::path::Path) -> Result<Vec<u8>, EngineError> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.is_empty() {
        return Err(EngineError::CaptureFailed("screenshot file is empty".into()));
    }
    Ok(bytes)
}

#[async_trait]
impl DeviceStream for ScreenCapture {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn next_frame(&self) -> Result<Option<VideoFrame>, EngineError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(None);
        }
        let mut next_due = self.next_due.lock().await;
        if let Some(due) = *next_due {
            tokio::select! {
                _ = tokio::time::sleep_until(due) => {}
                _ = shutdown_rx.changed() => return Ok(None),
            }
        }

        let mut failures: u32 = 0;
        loop {
            let started = Instant::now();
            let result = tokio::select! {
                r = self.capture_frame() => r,
                _ = shutdown_rx.changed() => return Ok(None),
            };
            match result {
                Ok(frame) => {
                    if failures > 0 {
                        debug!(device = %self.identity, failures, "capture recovered");
                    }
                    *next_due = Some(started + self.config.frame_interval());
                    if self.frames.fetch_add(1, Ordering::Relaxed) == 0 {
                        info!(device = %self.identity, bytes = frame.len(), "first frame captured");
                    }
                    return Ok(Some(frame));
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        warn!(device = %self.identity, error = %e, "capture failed, retrying");
                    } else {
                        debug!(
                            device = %self.identity,
                            failures,
                            error = %e,
                            "capture failed again"
                        );
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.capture_backoff()) => {}
                        _ = shutdown_rx.changed() => return Ok(None),
                    }
                }
            }
        }
    }

    async fn inject_touch(&self, action: TouchAction, x: i32, y: i32) {
        let gesture = {
            let Ok(mut state) = self.gesture.lock() else {
                return;
            };
            match action {
                TouchAction::Down => {
                    state.press(f64::from(x), f64::from(y));
                    None
                }
                TouchAction::Up => state.release(f64::from(x), f64::from(y)),
                TouchAction::Move => None,
            }
        };
        if let Some(gesture) = gesture {
            self.run_gesture(gesture);
        }
    }

    async fn inject_key(&self, action: KeyAction, keycode: i32) {
        debug!(
            device = %self.identity,
            ?action,
            keycode,
            "key input not supported on iOS, ignored"
        );
    }

    async fn go_home(&self) {
        if let Err(e) = self.idb.home(self.udid()).await {
            warn!(device = %self.identity, error = %e, "home button failed");
        }
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
        if self.alive.swap(false, Ordering::SeqCst) {
            self.shutdown_tx.send_replace(true);
            info!(
                device = %self.identity,
                frames = self.frames.load(Ordering::Relaxed),
                "screen capture stopped"
            );
        }
    }
}
