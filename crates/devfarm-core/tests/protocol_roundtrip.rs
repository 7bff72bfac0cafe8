//! Integration tests for the devfarm-core scrcpy codec.
//!
//! These tests walk a byte stream shaped like the one the companion server
//! writes, using only the public API, and check the control messages the
//! host sends back.

use devfarm_core::{
    protocol::{
        control::{INJECT_KEYCODE_SIZE, INJECT_TOUCH_SIZE, KEYCODE_HOME},
        scrcpy::{FRAME_HEADER_SIZE, METADATA_SIZE},
    },
    ControlMessage, FrameHeader, FrameKind, KeyAction, TouchAction, VideoFrame, VideoMetadata,
};

/// Builds metadata followed by `packets` as the server would send them.
fn server_stream(meta: VideoMetadata, packets: &[(FrameHeader, Vec<u8>)]) -> Vec<u8> {
    let mut bytes = meta.encode().to_vec();
    for (header, payload) in packets {
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(payload);
    }
    bytes
}

/// Parses a complete server stream into metadata and frames.
fn demux(bytes: &[u8]) -> (VideoMetadata, Vec<VideoFrame>) {
    let meta = VideoMetadata::decode(bytes).expect("metadata must decode");
    let mut offset = METADATA_SIZE;
    let mut frames = Vec::new();
    while offset < bytes.len() {
        let header = FrameHeader::decode(&bytes[offset..]).expect("header must decode");
        offset += FRAME_HEADER_SIZE;
        let end = offset + header.payload_len as usize;
        frames.push(VideoFrame::packet(&header, bytes[offset..end].to_vec()));
        offset = end;
    }
    (meta, frames)
}

#[test]
fn test_stream_of_config_then_keyframe_then_delta() {
    // Arrange
    let meta = VideoMetadata {
        codec_id: *b"h264",
        width: 720,
        height: 1600,
    };
    let packets = vec![
        (
            FrameHeader {
                pts: 0,
                is_config: true,
                is_keyframe: false,
                payload_len: 4,
            },
            vec![0, 0, 0, 1],
        ),
        (
            FrameHeader {
                pts: 1000,
                is_config: false,
                is_keyframe: true,
                payload_len: 3,
            },
            vec![0x65, 0x88, 0x84],
        ),
        (
            FrameHeader {
                pts: 17_666,
                is_config: false,
                is_keyframe: false,
                payload_len: 0,
            },
            vec![],
        ),
    ];

    // Act
    let (decoded_meta, frames) = demux(&server_stream(meta, &packets));

    // Assert
    assert_eq!(decoded_meta, meta);
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames[0].kind,
        FrameKind::Packet {
            pts: 0,
            config: true,
            keyframe: false
        }
    );
    assert_eq!(
        frames[1].kind,
        FrameKind::Packet {
            pts: 1000,
            config: false,
            keyframe: true
        }
    );
    assert_eq!(frames[1].payload, vec![0x65, 0x88, 0x84]);
    assert!(frames[2].is_empty());
}

#[test]
fn test_touch_up_anywhere_releases_pressure_and_buttons() {
    for (x, y) in [(0, 0), (719, 1599), (-10, 5000)] {
        let bytes = ControlMessage::touch(TouchAction::Up, x, y, 720, 1600).encode();
        assert_eq!(bytes.len(), INJECT_TOUCH_SIZE);
        match ControlMessage::decode(&bytes).expect("decode must succeed") {
            ControlMessage::InjectTouch {
                pressure, buttons, ..
            } => {
                assert_eq!(pressure, 0, "pressure at ({x},{y})");
                assert_eq!(buttons, 0, "buttons at ({x},{y})");
            }
            other => panic!("expected touch, got {other:?}"),
        }
    }
}

#[test]
fn test_home_press_is_two_key_messages() {
    let mut wire = ControlMessage::key(KeyAction::Down, KEYCODE_HOME).encode();
    wire.extend(ControlMessage::key(KeyAction::Up, KEYCODE_HOME).encode());

    assert_eq!(wire.len(), 2 * INJECT_KEYCODE_SIZE);
    let first = ControlMessage::decode(&wire).unwrap();
    let second = ControlMessage::decode(&wire[INJECT_KEYCODE_SIZE..]).unwrap();
    assert_eq!(first, ControlMessage::key(KeyAction::Down, 3));
    assert_eq!(second, ControlMessage::key(KeyAction::Up, 3));
}
