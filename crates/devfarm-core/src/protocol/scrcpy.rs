//! Binary codec for the scrcpy video channel.
//!
//! Wire format, after the one-byte handshake:
//! ```text
//! metadata (once): [codec_id:4][width:4][height:4]
//! packet (repeat): [pts_and_flags:8][payload_len:4][payload:N]
//! ```
//! All multi-byte integers are big-endian.  In `pts_and_flags` bit 63 is the
//! config-packet flag, bit 62 the keyframe flag, and bits 0..=61 the
//! presentation timestamp.

use thiserror::Error;

/// Size of the stream metadata preamble in bytes.
pub const METADATA_SIZE: usize = 12;

/// Size of each packet header in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Payloads larger than this are suspicious and get logged by the reader.
pub const LARGE_PACKET_WARN_BYTES: u32 = 2_000_000;

/// Payloads larger than this mean the reader lost framing; the stream is
/// abandoned instead of allocating the declared size.
pub const MAX_PACKET_BYTES: u32 = 32 * 1024 * 1024;

const CONFIG_FLAG: u64 = 1 << 63;
const KEYFRAME_FLAG: u64 = 1 << 62;
const PTS_MASK: u64 = KEYFRAME_FLAG - 1;

/// Errors that can occur while decoding scrcpy framing.
#[derive(Debug, Error, PartialEq)]
pub enum ScrcpyCodecError {
    /// The byte slice is shorter than the fixed structure being decoded.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A control message carried a type byte this codec does not know.
    #[error("unknown control message type: 0x{0:02X}")]
    UnknownControlType(u8),

    /// A field value was out of range.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Stream metadata ───────────────────────────────────────────────────────────

/// The 12-byte preamble the server sends once before the first packet.
///
/// Its width and height are authoritative: they replace whatever size the
/// host guessed before the stream started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMetadata {
    /// Four ASCII bytes naming the codec, e.g. `b"h264"`.
    pub codec_id: [u8; 4],
    /// Encoded video width in pixels.
    pub width: u32,
    /// Encoded video height in pixels.
    pub height: u32,
}

impl VideoMetadata {
    /// Returns the codec id as text, or its hex value when it is not ASCII.
    pub fn codec_name(&self) -> String {
        if self.codec_id.iter().all(|b| b.is_ascii_graphic()) {
            String::from_utf8_lossy(&self.codec_id).into_owned()
        } else {
            format!("0x{:08x}", u32::from_be_bytes(self.codec_id))
        }
    }

    /// Encodes the metadata into its 12-byte wire form.
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        buf[0..4].copy_from_slice(&self.codec_id);
        buf[4..8].copy_from_slice(&self.width.to_be_bytes());
        buf[8..12].copy_from_slice(&self.height.to_be_bytes());
        buf
    }

    /// Decodes metadata from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrcpyCodecError::InsufficientData`] if fewer than 12 bytes
    /// are available.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use devfarm_core::protocol::scrcpy::VideoMetadata;
    ///
    /// let meta = VideoMetadata { codec_id: *b"h264", width: 720, height: 1600 };
    /// let decoded = VideoMetadata::decode(&meta.encode()).unwrap();
    /// assert_eq!(decoded, meta);
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, ScrcpyCodecError> {
        require_len(bytes, METADATA_SIZE)?;
        Ok(Self {
            codec_id: [bytes[0], bytes[1], bytes[2], bytes[3]],
            width: read_u32(bytes, 4),
            height: read_u32(bytes, 8),
        })
    }
}

// ── Packet header ─────────────────────────────────────────────────────────────

/// The 12-byte header that precedes every video packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Presentation timestamp in microseconds (62 bits).
    pub pts: u64,
    /// `true` for codec configuration packets (SPS/PPS).
    pub is_config: bool,
    /// `true` when the packet starts a keyframe.
    pub is_keyframe: bool,
    /// Number of payload bytes that follow the header.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Packs the timestamp and both flags into the 64-bit wire field.
    ///
    /// Timestamp bits above bit 61 are discarded.
    pub fn packed_pts(&self) -> u64 {
        let mut packed = self.pts & PTS_MASK;
        if self.is_config {
            packed |= CONFIG_FLAG;
        }
        if self.is_keyframe {
            packed |= KEYFRAME_FLAG;
        }
        packed
    }

    /// Splits a packed 64-bit field back into `(pts, is_config, is_keyframe)`.
    pub fn unpack_pts(packed: u64) -> (u64, bool, bool) {
        (
            packed & PTS_MASK,
            packed & CONFIG_FLAG != 0,
            packed & KEYFRAME_FLAG != 0,
        )
    }

    /// Encodes the header into its 12-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.packed_pts().to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decodes a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrcpyCodecError::InsufficientData`] if fewer than 12 bytes
    /// are available.
    pub fn decode(bytes: &[u8]) -> Result<Self, ScrcpyCodecError> {
        require_len(bytes, FRAME_HEADER_SIZE)?;
        let packed = read_u64(bytes, 0);
        let (pts, is_config, is_keyframe) = Self::unpack_pts(packed);
        Ok(Self {
            pts,
            is_config,
            is_keyframe,
            payload_len: read_u32(bytes, 8),
        })
    }
}

// ── Primitive helpers ─────────────────────────────────────────────────────────

pub(crate) fn require_len(buf: &[u8], needed: usize) -> Result<(), ScrcpyCodecError> {
    if buf.len() < needed {
        Err(ScrcpyCodecError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// Callers check the length first.
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
