use bytes::Bytes;

/// Which output stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Bookkeeping cost charged per queued packet on top of its payload.
pub const PACKET_OVERHEAD: usize = std::mem::size_of::<MediaPacket>();

/// One video frame or audio block, owned and ready for the muxer.
///
/// `pts` and `duration` are in the owning stream's timebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub stream:   StreamKind,
    pub data:     Bytes,
    pub pts:      i64,
    pub duration: i64,
    /// Arrival position, assigned by the queue on admission.
    pub seq:      u64,
    pub key:      bool,
}

impl MediaPacket {
    pub fn video(data: Bytes, pts: i64, duration: i64) -> Self {
        Self { stream: StreamKind::Video, data, pts, duration, seq: 0, key: true }
    }

    pub fn audio(data: Bytes, pts: i64) -> Self {
        Self { stream: StreamKind::Audio, data, pts, duration: 0, seq: 0, key: true }
    }

    pub fn is_video(&self) -> bool {
        self.stream == StreamKind::Video
    }

    /// Bytes this packet counts for in queue accounting.
    pub fn size(&self) -> usize {
        self.data.len() + PACKET_OVERHEAD
    }
}
