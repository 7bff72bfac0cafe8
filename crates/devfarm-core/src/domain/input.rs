//! Input events decoded from a browser connection.
//!
//! Coordinates arrive raw: either already in device pixels or normalised to
//! the `0.0..=1.0` range.  [`to_device_pixels`] settles which.

/// Pointer action, numbered as the scrcpy server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchAction {
    Down,
    Up,
    Move,
}

impl TouchAction {
    pub fn as_u8(self) -> u8 {
        match self {
            TouchAction::Down => 0,
            TouchAction::Up => 1,
            TouchAction::Move => 2,
        }
    }
}

impl TryFrom<u8> for TouchAction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TouchAction::Down),
            1 => Ok(TouchAction::Up),
            2 => Ok(TouchAction::Move),
            other => Err(other),
        }
    }
}

/// Key action, numbered as the scrcpy server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Down,
    Up,
}

impl KeyAction {
    pub fn as_u8(self) -> u8 {
        match self {
            KeyAction::Down => 0,
            KeyAction::Up => 1,
        }
    }
}

impl TryFrom<u8> for KeyAction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyAction::Down),
            1 => Ok(KeyAction::Up),
            other => Err(other),
        }
    }
}

/// One user input destined for a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Touch { action: TouchAction, x: f64, y: f64 },
    Key { action: KeyAction, keycode: i32 },
    Home,
}

/// Maps a raw client coordinate onto a `width` x `height` device.
///
/// When both components lie in `0.0..=1.0` they are treated as fractions of
/// the screen; otherwise they are already pixels.  Either way the result is
/// rounded to the nearest whole pixel.
///
/// ```rust
/// use devfarm_core::domain::input::to_device_pixels;
///
/// assert_eq!(to_device_pixels(0.5, 0.25, 1080, 2400), (540, 600));
/// assert_eq!(to_device_pixels(300.0, 700.0, 1080, 2400), (300, 700));
/// ```
pub fn to_device_pixels(x: f64, y: f64, width: u32, height: u32) -> (i32, i32) {
    let normalised = (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y);
    let (px, py) = if normalised {
        (x * f64::from(width), y * f64::from(height))
    } else {
        (x, y)
    };
    (px.round() as i32, py.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_action_try_from_accepts_0_to_2() {
        assert_eq!(TouchAction::try_from(0), Ok(TouchAction::Down));
        assert_eq!(TouchAction::try_from(1), Ok(TouchAction::Up));
        assert_eq!(TouchAction::try_from(2), Ok(TouchAction::Move));
        assert_eq!(TouchAction::try_from(3), Err(3));
    }

    #[test]
    fn test_key_action_rejects_move() {
        assert_eq!(KeyAction::try_from(2), Err(2));
    }

    #[test]
    fn test_normalised_corner_maps_to_full_size() {
        assert_eq!(to_device_pixels(1.0, 1.0, 720, 1280), (720, 1280));
        assert_eq!(to_device_pixels(0.0, 0.0, 720, 1280), (0, 0));
    }

    #[test]
    fn test_mixed_range_is_treated_as_pixels() {
        // x looks normalised but y does not, so neither is scaled.
        assert_eq!(to_device_pixels(0.5, 640.0, 720, 1280), (1, 640));
    }

    #[test]
    fn test_negative_coordinates_pass_through() {
        assert_eq!(to_device_pixels(-4.0, 10.0, 720, 1280), (-4, 10));
    }
}
