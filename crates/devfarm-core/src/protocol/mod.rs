//! Protocol module containing the scrcpy video framing and control messages.

pub mod control;
pub mod scrcpy;

pub use control::ControlMessage;
pub use scrcpy::{FrameHeader, ScrcpyCodecError, VideoMetadata};
