//! The capability through which captured frames leave the hardware thread.
//!
//! Frame data is *borrowed*: the hardware reclaims the buffer as soon as the
//! callback returns, so a sink must copy (or fully consume) `data` before it
//! returns. Sinks run on the hardware callback thread and must not block.

use crate::errors::SinkError;

/// One video frame as delivered by the hardware.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    /// Stream time in units of the negotiated timebase denominator.
    pub timestamp: i64,
    pub duration: i64,
    pub flags: i64,
}

impl VideoFrame<'_> {
    /// Size of the frame payload in bytes (`stride * height`).
    pub fn payload_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// One block of interleaved audio samples.
#[derive(Debug, Clone, Copy)]
pub struct AudioPacket<'a> {
    pub data: &'a [u8],
    /// Number of sample frames (one sample per channel each).
    pub sample_count: u32,
    /// Packet time in 1/48000 s units.
    pub timestamp: i64,
    pub flags: i64,
}

/// Consumer of captured frames.
pub trait FrameSink: Send + Sync {
    fn video_frame(&self, frame: VideoFrame<'_>) -> Result<(), SinkError>;

    fn audio_packet(&self, packet: AudioPacket<'_>) -> Result<(), SinkError>;
}
