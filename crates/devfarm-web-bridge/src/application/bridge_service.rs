//! Browser message and route handling.
//!
//! # Routes
//!
//! ```text
//! /stream/{android|ios}/{id}   video out, input in
//! /logs/{android|ios}/{id}     device log lines out
//! ```
//!
//! For Android the id is the AVD name; for iOS it is the simulator UDID.
//! A query string is ignored.
//!
//! # Input translation
//!
//! A [`ClientMessage`] becomes zero or more [`InputEvent`]s.  A key without
//! an explicit action expands to a press followed by a release, which is
//! what a browser "tap this key" button means.

use devfarm_core::{DeviceIdentity, InputEvent, KeyAction, Platform, TouchAction};
use thiserror::Error;

use crate::domain::messages::{ClientMessage, ErrorNotice};

/// Errors raised while interpreting browser input.
///
/// None of these end a connection; the server logs them and moves on.
#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("invalid client message: {0}")]
    InvalidJson(String),

    #[error("invalid touch action {0} (expected 0, 1 or 2)")]
    InvalidTouchAction(u8),

    #[error("invalid key action {0} (expected 0 or 1)")]
    InvalidKeyAction(u8),

    #[error("unknown route: {0}")]
    UnknownRoute(String),
}

/// What a WebSocket path asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Stream(DeviceIdentity),
    Logs(DeviceIdentity),
}

impl Route {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            Route::Stream(identity) | Route::Logs(identity) => identity,
        }
    }
}

/// Parses a request path into a [`Route`].
///
/// ```rust
/// use devfarm_web_bridge::application::{parse_route, Route};
/// use devfarm_core::DeviceIdentity;
///
/// let route = parse_route("/stream/android/Pixel_7?token=x").unwrap();
/// assert_eq!(route, Route::Stream(DeviceIdentity::android("Pixel_7")));
/// ```
///
/// # Errors
///
/// [`BridgeError::UnknownRoute`] for anything that is not exactly
/// `/{stream|logs}/{platform}/{id}` with a non-empty id.
pub fn parse_route(path: &str) -> Result<Route, BridgeError> {
    let unknown = || BridgeError::UnknownRoute(path.to_string());
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let [kind, platform, id] = segments.as_slice() else {
        return Err(unknown());
    };
    if id.is_empty() {
        return Err(unknown());
    }
    let platform: Platform = platform.parse().map_err(|_| unknown())?;
    let identity = match platform {
        Platform::Android => DeviceIdentity::android(*id),
        Platform::Ios => DeviceIdentity::ios(*id),
    };

    match *kind {
        "stream" => Ok(Route::Stream(identity)),
        "logs" => Ok(Route::Logs(identity)),
        _ => Err(unknown()),
    }
}

/// Parses one text frame from the browser.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, BridgeError> {
    serde_json::from_str(text).map_err(|e| BridgeError::InvalidJson(e.to_string()))
}

/// Converts a browser message into the input events to inject, in order.
pub fn translate_client_message(msg: &ClientMessage) -> Result<Vec<InputEvent>, BridgeError> {
    match *msg {
        ClientMessage::Touch { action, x, y } => {
            let action = TouchAction::try_from(action).map_err(BridgeError::InvalidTouchAction)?;
            Ok(vec![InputEvent::Touch { action, x, y }])
        }
        ClientMessage::Key {
            keycode,
            action: Some(action),
        } => {
            let action = KeyAction::try_from(action).map_err(BridgeError::InvalidKeyAction)?;
            Ok(vec![InputEvent::Key { action, keycode }])
        }
        ClientMessage::Key { keycode, action: None } => Ok(vec![
            InputEvent::Key {
                action: KeyAction::Down,
                keycode,
            },
            InputEvent::Key {
                action: KeyAction::Up,
                keycode,
            },
        ]),
        ClientMessage::Home => Ok(vec![InputEvent::Home]),
    }
}

/// The JSON text sent to a browser whose connection is being refused.
pub fn error_notice_json(reason: &str) -> String {
    let notice = ErrorNotice {
        error: reason.to_string(),
    };
    // A struct with one String field always serializes.
    serde_json::to_string(&notice).unwrap_or_else(|_| String::from(r#"{"error":"internal error"}"#))
}
