//! `PacketWriter`: the thread that drains the [`PacketQueue`] into a
//! [`Muxer`].
//!
//! ```text
//! PacketQueue ──get(block)──► Muxer::write_packet   (until the abort sentinel)
//! ```
//!
//! The muxer is handed back on [`PacketWriter::join`] so the control thread
//! finishes it after the drain.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::muxer::{MuxError, Muxer};
use crate::packet::StreamKind;
use crate::queue::{PacketQueue, Pop};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub bytes:         u64,
    pub write_errors:  u64,
}

pub struct PacketWriter {
    handle: JoinHandle<(Box<dyn Muxer>, WriterStats)>,
}

impl PacketWriter {
    pub fn spawn(queue: Arc<PacketQueue>, muxer: Box<dyn Muxer>) -> Result<Self, MuxError> {
        let handle = thread::Builder::new()
            .name("bmd-writer".into())
            .spawn(move || drain(&queue, muxer))
            .map_err(|source| MuxError::Io { path: "<writer thread>".into(), source })?;
        Ok(Self { handle })
    }

    /// Wait for the writer to reach the abort sentinel.
    pub fn join(self) -> Result<(Box<dyn Muxer>, WriterStats), MuxError> {
        self.handle.join().map_err(|_| MuxError::WriterPanicked)
    }
}

fn drain(queue: &PacketQueue, mut muxer: Box<dyn Muxer>) -> (Box<dyn Muxer>, WriterStats) {
    let mut stats = WriterStats::default();
    loop {
        match queue.get(true) {
            Pop::Packet(packet) => match muxer.write_packet(&packet) {
                Ok(()) => {
                    match packet.stream {
                        StreamKind::Video => stats.video_packets += 1,
                        StreamKind::Audio => stats.audio_packets += 1,
                    }
                    stats.bytes += packet.data.len() as u64;
                }
                Err(e) => {
                    stats.write_errors += 1;
                    let errs = stats.write_errors;
                    if errs <= 10 || errs % 100 == 0 {
                        warn!("Muxer write error #{}: {}", errs, e);
                    }
                }
            },
            Pop::Aborted => break,
            Pop::Empty => continue,
        }
    }
    debug!("Writer drained: {:?}", stats);
    (muxer, stats)
}
