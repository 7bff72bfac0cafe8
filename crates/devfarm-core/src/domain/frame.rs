//! Video frames emitted by a device stream.

use crate::protocol::scrcpy::FrameHeader;

/// How a frame was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// One encoded packet from the scrcpy video socket.
    Packet {
        pts: u64,
        config: bool,
        keyframe: bool,
    },
    /// A re-encoded still image from the iOS screenshot loop.
    Still,
}

/// An opaque frame payload plus the flags that came with it.
///
/// Frames are transient: they are forwarded to the browser and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub payload: Vec<u8>,
    pub kind: FrameKind,
}

impl VideoFrame {
    /// A scrcpy packet described by `header`.
    pub fn packet(header: &FrameHeader, payload: Vec<u8>) -> Self {
        Self {
            payload,
            kind: FrameKind::Packet {
                pts: header.pts,
                config: header.is_config,
                keyframe: header.is_keyframe,
            },
        }
    }

    /// A JPEG still.
    pub fn still(jpeg: Vec<u8>) -> Self {
        Self {
            payload: jpeg,
            kind: FrameKind::Still,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_frame_copies_header_flags() {
        let header = FrameHeader {
            pts: 33_000,
            is_config: false,
            is_keyframe: true,
            payload_len: 3,
        };
        let frame = VideoFrame::packet(&header, vec![1, 2, 3]);
        assert_eq!(
            frame.kind,
            FrameKind::Packet {
                pts: 33_000,
                config: false,
                keyframe: true
            }
        );
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_still_frame_keeps_payload() {
        let frame = VideoFrame::still(vec![0xFF, 0xD8]);
        assert_eq!(frame.kind, FrameKind::Still);
        assert_eq!(frame.into_payload(), vec![0xFF, 0xD8]);
    }
}
