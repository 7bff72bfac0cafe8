//! iOS gesture synthesis.
//!
//! The simulator has no touch-injection socket, only discrete automation
//! commands (`idb ui tap`, `idb ui swipe`).  A press and its release are
//! therefore collapsed into one command: a short movement is a tap at the
//! release point, anything longer is a swipe from press to release.
//!
//! Browser coordinates are in screenshot pixels while `idb` expects logical
//! points, so every command is rescaled through a [`PointScale`].

use super::device::ScreenDimensions;

/// Release distance, in pixels, at or above which a gesture is a swipe.
pub const DEFAULT_SWIPE_THRESHOLD_PX: f64 = 20.0;

/// A completed gesture in whatever coordinate space it was built in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Tap {
        x: f64,
        y: f64,
    },
    Swipe {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
    },
}

impl Gesture {
    /// Classifies a press at `down` released at `up`.
    ///
    /// ```rust
    /// use devfarm_core::Gesture;
    ///
    /// let g = Gesture::classify((100.0, 100.0), (105.0, 102.0), 20.0);
    /// assert_eq!(g, Gesture::Tap { x: 105.0, y: 102.0 });
    /// ```
    pub fn classify(down: (f64, f64), up: (f64, f64), threshold: f64) -> Self {
        let distance = (up.0 - down.0).hypot(up.1 - down.1);
        if distance < threshold {
            Gesture::Tap { x: up.0, y: up.1 }
        } else {
            Gesture::Swipe {
                from_x: down.0,
                from_y: down.1,
                to_x: up.0,
                to_y: up.1,
            }
        }
    }

    /// Returns the same gesture with every coordinate run through `scale`.
    pub fn scaled(&self, scale: &PointScale) -> Self {
        match *self {
            Gesture::Tap { x, y } => {
                let (x, y) = scale.apply(x, y);
                Gesture::Tap { x, y }
            }
            Gesture::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
            } => {
                let (from_x, from_y) = scale.apply(from_x, from_y);
                let (to_x, to_y) = scale.apply(to_x, to_y);
                Gesture::Swipe {
                    from_x,
                    from_y,
                    to_x,
                    to_y,
                }
            }
        }
    }
}

/// Tracks the last press so the matching release can be classified.
///
/// Only the most recent press is remembered.  A release with no press, or a
/// press never released, produces nothing.
#[derive(Debug, Clone)]
pub struct TouchGestureState {
    last_down: Option<(f64, f64)>,
    threshold: f64,
}

impl TouchGestureState {
    pub fn new(threshold: f64) -> Self {
        Self {
            last_down: None,
            threshold,
        }
    }

    /// Remembers a press, replacing any earlier unreleased one.
    pub fn press(&mut self, x: f64, y: f64) {
        self.last_down = Some((x, y));
    }

    /// Consumes the stored press and classifies the gesture it completes.
    pub fn release(&mut self, x: f64, y: f64) -> Option<Gesture> {
        self.last_down
            .take()
            .map(|down| Gesture::classify(down, (x, y), self.threshold))
    }

    pub fn has_pending_press(&self) -> bool {
        self.last_down.is_some()
    }
}

impl Default for TouchGestureState {
    fn default() -> Self {
        Self::new(DEFAULT_SWIPE_THRESHOLD_PX)
    }
}

/// Pixel-to-point multipliers for each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointScale {
    pub x: f64,
    pub y: f64,
}

impl PointScale {
    /// No rescaling.
    pub const IDENTITY: PointScale = PointScale { x: 1.0, y: 1.0 };

    /// Derives the scale from a device description.
    ///
    /// Preference order: the points/pixels ratio (the y axis falls back to
    /// the x ratio when height is missing), then `1 / density`, then no
    /// scaling at all.
    pub fn from_dimensions(dims: Option<&ScreenDimensions>) -> Self {
        let Some(dims) = dims else {
            return Self::IDENTITY;
        };
        let ratio = |points: Option<f64>, pixels: Option<f64>| match (points, pixels) {
            (Some(pt), Some(px)) if pt > 0.0 && px > 0.0 => Some(pt / px),
            _ => None,
        };
        if let Some(x) = ratio(dims.width, dims.width_pixels) {
            let y = ratio(dims.height, dims.height_pixels).unwrap_or(x);
            return Self { x, y };
        }
        match dims.density {
            Some(d) if d > 0.0 => Self {
                x: 1.0 / d,
                y: 1.0 / d,
            },
            _ => Self::IDENTITY,
        }
    }

    /// Scales a pixel coordinate into points, truncated to whole points.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        ((x * self.x).trunc(), (y * self.y).trunc())
    }
}
