//! Sequential reader for the scrcpy video socket.
//!
//! Reads are strictly ordered: the metadata preamble once, then header and
//! payload pairs forever.  A clean end of file at any read means the server
//! died and ends the stream; it is not reported as an error.

use devfarm_core::protocol::scrcpy::{
    FRAME_HEADER_SIZE, LARGE_PACKET_WARN_BYTES, MAX_PACKET_BYTES, METADATA_SIZE,
};
use devfarm_core::{FrameHeader, VideoFrame, VideoMetadata};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info, warn};

use crate::error::EngineError;

/// What one read step produced.
#[derive(Debug, PartialEq, Eq)]
pub enum DemuxEvent {
    /// The preamble arrived; its size supersedes any earlier guess.
    Metadata(VideoMetadata),
    Frame(VideoFrame),
    /// The server closed the socket.
    End,
}

/// Demultiplexes one video socket.
pub struct VideoDemuxer<R> {
    reader: R,
    metadata: Option<VideoMetadata>,
}

impl<R: AsyncRead + Unpin + Send> VideoDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            metadata: None,
        }
    }

    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.metadata
    }

    /// Performs the next read step.
    ///
    /// The first call yields [`DemuxEvent::Metadata`]; later calls yield one
    /// frame each until [`DemuxEvent::End`].
    ///
    /// Not cancel-safe: dropping the future mid-read leaves the socket
    /// misaligned, so a cancelled demuxer must be discarded.
    pub async fn next_event(&mut self) -> Result<DemuxEvent, EngineError> {
        if self.metadata.is_none() {
            let mut buf = [0u8; METADATA_SIZE];
            if !read_exact_or_eof(&mut self.reader, &mut buf).await? {
                return Ok(DemuxEvent::End);
            }
            let meta = VideoMetadata::decode(&buf)
                .map_err(|e| EngineError::parse("video metadata", e))?;
            info!(
                codec = %meta.codec_name(),
                width = meta.width,
                height = meta.height,
                "video stream metadata"
            );
            self.metadata = Some(meta);
            return Ok(DemuxEvent::Metadata(meta));
        }

        let mut buf = [0u8; FRAME_HEADER_SIZE];
        if !read_exact_or_eof(&mut self.reader, &mut buf).await? {
            return Ok(DemuxEvent::End);
        }
        let header =
            FrameHeader::decode(&buf).map_err(|e| EngineError::parse("frame header", e))?;
        if header.payload_len > MAX_PACKET_BYTES {
            error!(size = header.payload_len, "video packet size out of range, abandoning stream");
            return Err(EngineError::StreamTerminated);
        }
        if header.payload_len > LARGE_PACKET_WARN_BYTES {
            warn!(size = header.payload_len, "unusually large video packet");
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        if !read_exact_or_eof(&mut self.reader, &mut payload).await? {
            return Ok(DemuxEvent::End);
        }
        Ok(DemuxEvent::Frame(VideoFrame::packet(&header, payload)))
    }
}

/// Fills `buf` completely.  Returns `false` on end of file.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<bool, EngineError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
