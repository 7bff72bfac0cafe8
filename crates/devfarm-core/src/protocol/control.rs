//! Control-channel messages sent from the host to the scrcpy server.
//!
//! Only the two message types the engine needs are modelled:
//!
//! ```text
//! inject keycode (14 bytes):
//!   [type:1][action:1][keycode:4][repeat:4][metastate:4]
//!
//! inject touch (32 bytes):
//!   [type:1][action:1][pointer_id:8][x:4][y:4][screen_w:2][screen_h:2]
//!   [pressure:2][action_button:4][buttons:4]
//! ```
//!
//! Every field is big-endian.  Coordinates are signed; the screen size fields
//! tell the server which frame size the coordinates refer to.

use super::scrcpy::{read_u16, read_u32, read_u64, require_len, ScrcpyCodecError};
use crate::domain::input::{KeyAction, TouchAction};

/// Message type byte for key injection.
pub const TYPE_INJECT_KEYCODE: u8 = 0;
/// Message type byte for touch injection.
pub const TYPE_INJECT_TOUCH: u8 = 2;

/// Encoded size of a key message.
pub const INJECT_KEYCODE_SIZE: usize = 14;
/// Encoded size of a touch message.
pub const INJECT_TOUCH_SIZE: usize = 32;

/// Pointer id of the single finger every touch is sent as.
///
/// The server reserves `-1` for the mouse; mouse events only press when the
/// action button matches the button mask, so touches must not use it.
pub const POINTER_ID_FINGER: u64 = 0;

/// Android `KEYCODE_HOME`.
pub const KEYCODE_HOME: i32 = 3;

const PRESSURE_MAX: u16 = 0xFFFF;
const BUTTON_PRIMARY: u32 = 1;

/// A single control message ready for the wire.
///
/// Build touch messages with [`ControlMessage::touch`] so the pressure and
/// button fields follow the action; the raw variant fields are public for
/// decoding and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    InjectKeycode {
        action: KeyAction,
        keycode: i32,
        repeat: u32,
        metastate: u32,
    },
    InjectTouch {
        action: TouchAction,
        pointer_id: u64,
        x: i32,
        y: i32,
        screen_width: u16,
        screen_height: u16,
        pressure: u16,
        action_button: u32,
        buttons: u32,
    },
}

impl ControlMessage {
    /// Builds a touch message against a `screen_width` x `screen_height` frame.
    ///
    /// A release (`TouchAction::Up`) carries zero pressure and no pressed
    /// buttons; down and move carry full pressure with the primary button set.
    /// Dimensions beyond `u16::MAX` saturate.
    pub fn touch(
        action: TouchAction,
        x: i32,
        y: i32,
        screen_width: u32,
        screen_height: u32,
    ) -> Self {
        let released = action == TouchAction::Up;
        Self::InjectTouch {
            action,
            pointer_id: POINTER_ID_FINGER,
            x,
            y,
            screen_width: saturate_u16(screen_width),
            screen_height: saturate_u16(screen_height),
            pressure: if released { 0 } else { PRESSURE_MAX },
            action_button: 0,
            buttons: if released { 0 } else { BUTTON_PRIMARY },
        }
    }

    /// Builds a key message with no repeat and no modifiers.
    pub fn key(action: KeyAction, keycode: i32) -> Self {
        Self::InjectKeycode {
            action,
            keycode,
            repeat: 0,
            metastate: 0,
        }
    }

    /// Encodes the message into its fixed-size wire form.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                let mut buf = Vec::with_capacity(INJECT_KEYCODE_SIZE);
                buf.push(TYPE_INJECT_KEYCODE);
                buf.push(action.as_u8());
                buf.extend_from_slice(&keycode.to_be_bytes());
                buf.extend_from_slice(&repeat.to_be_bytes());
                buf.extend_from_slice(&metastate.to_be_bytes());
                buf
            }
            Self::InjectTouch {
                action,
                pointer_id,
                x,
                y,
                screen_width,
                screen_height,
                pressure,
                action_button,
                buttons,
            } => {
                let mut buf = Vec::with_capacity(INJECT_TOUCH_SIZE);
                buf.push(TYPE_INJECT_TOUCH);
                buf.push(action.as_u8());
                buf.extend_from_slice(&pointer_id.to_be_bytes());
                buf.extend_from_slice(&x.to_be_bytes());
                buf.extend_from_slice(&y.to_be_bytes());
                buf.extend_from_slice(&screen_width.to_be_bytes());
                buf.extend_from_slice(&screen_height.to_be_bytes());
                buf.extend_from_slice(&pressure.to_be_bytes());
                buf.extend_from_slice(&action_button.to_be_bytes());
                buf.extend_from_slice(&buttons.to_be_bytes());
                buf
            }
        }
    }

    /// Decodes one message from the start of `bytes`.
    ///
    /// The engine never receives control messages; this exists so tests and
    /// fake servers can inspect what the client sent.
    ///
    /// # Errors
    ///
    /// - [`ScrcpyCodecError::InsufficientData`] for a truncated message.
    /// - [`ScrcpyCodecError::UnknownControlType`] for any other type byte.
    /// - [`ScrcpyCodecError::MalformedPayload`] for an out-of-range action.
    pub fn decode(bytes: &[u8]) -> Result<Self, ScrcpyCodecError> {
        require_len(bytes, 1)?;
        match bytes[0] {
            TYPE_INJECT_KEYCODE => {
                require_len(bytes, INJECT_KEYCODE_SIZE)?;
                let action = KeyAction::try_from(bytes[1])
                    .map_err(|v| ScrcpyCodecError::MalformedPayload(format!("key action {v}")))?;
                Ok(Self::InjectKeycode {
                    action,
                    keycode: read_u32(bytes, 2) as i32,
                    repeat: read_u32(bytes, 6),
                    metastate: read_u32(bytes, 10),
                })
            }
            TYPE_INJECT_TOUCH => {
                require_len(bytes, INJECT_TOUCH_SIZE)?;
                let action = TouchAction::try_from(bytes[1])
                    .map_err(|v| ScrcpyCodecError::MalformedPayload(format!("touch action {v}")))?;
                Ok(Self::InjectTouch {
                    action,
                    pointer_id: read_u64(bytes, 2),
                    x: read_u32(bytes, 10) as i32,
                    y: read_u32(bytes, 14) as i32,
                    screen_width: read_u16(bytes, 18),
                    screen_height: read_u16(bytes, 20),
                    pressure: read_u16(bytes, 22),
                    action_button: read_u32(bytes, 24),
                    buttons: read_u32(bytes, 28),
                })
            }
            other => Err(ScrcpyCodecError::UnknownControlType(other)),
        }
    }
}

fn saturate_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
