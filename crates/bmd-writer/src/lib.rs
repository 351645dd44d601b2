//! Capture output path: frames → packets → queue → writer thread → muxer.
//!
//! ```text
//! FrameSink (QueueSink) ─► PacketQueue ─► PacketWriter ─► Muxer (raw | GStreamer)
//! ```

pub mod config;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod layout;
pub mod muxer;
pub mod packet;
pub mod queue;
pub mod sink;
pub mod writer;

pub use config::RecorderConfig;
pub use layout::{AudioCodec, ContainerFormat, StreamLayout, VideoCodec};
pub use muxer::{open_muxer, MuxError, MuxStats, Muxer, RawMuxer};
pub use packet::{MediaPacket, StreamKind, PACKET_OVERHEAD};
pub use queue::{AdmissionPolicy, PacketQueue, Pop, QueueError, QueueStats, DEFAULT_MEMORY_LIMIT};
pub use sink::{QueueSink, SinkStats};
pub use writer::{PacketWriter, WriterStats};
