//! JSON messages exchanged with the browser.
//!
//! # Message flow
//!
//! ```text
//! Browser → Bridge:  JSON text frame  →  ClientMessage  →  InputEvent(s)
//! Bridge  → Browser: VideoFrame payload as a binary frame
//!                    ErrorNotice as a JSON text frame, then close
//! ```
//!
//! # JSON discriminant
//!
//! Every client message is an object whose `"type"` field names the variant:
//!
//! ```json
//! {"type":"touch","action":0,"x":0.42,"y":0.77}
//! {"type":"key","keycode":4}
//! {"type":"home"}
//! ```

use serde::{Deserialize, Serialize};

/// Input sent by the browser.
///
/// Actions travel as their scrcpy numbers (touch: 0 down, 1 up, 2 move; key:
/// 0 down, 1 up) and are validated during translation, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A pointer event.  `x`/`y` are either 0..1 fractions of the screen or
    /// device pixels.
    Touch { action: u8, x: f64, y: f64 },

    /// An Android keycode.  Without an `action` the key is pressed and
    /// released.
    Key {
        keycode: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<u8>,
    },

    /// The home button.
    Home,
}

impl ClientMessage {
    /// Variant name for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Touch { .. } => "touch",
            ClientMessage::Key { .. } => "key",
            ClientMessage::Home => "home",
        }
    }
}

/// The one message a browser gets when its connection cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_deserializes_from_browser_json() {
        // Arrange
        let json = r#"{"type":"touch","action":2,"x":0.5,"y":120.0}"#;

        // Act
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(
            msg,
            ClientMessage::Touch {
                action: 2,
                x: 0.5,
                y: 120.0
            }
        );
    }

    #[test]
    fn test_key_action_is_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"key","keycode":4}"#).unwrap();
        assert_eq!(msg, ClientMessage::Key { keycode: 4, action: None });
    }

    #[test]
    fn test_home_has_no_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"home"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Home);
        assert_eq!(msg.type_name(), "home");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"scroll","dy":3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_touch_missing_coordinate_is_rejected() {
        let json = r#"{"type":"touch","action":0,"x":1}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_notice_shape() {
        let json = serde_json::to_string(&ErrorNotice {
            error: "device unavailable".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"error":"device unavailable"}"#);
    }
}
