//! `QueueSink`: the [`FrameSink`] that turns hardware frames into queued
//! [`MediaPacket`]s.
//!
//! Runs on the hardware callback thread. Frame memory is copied before the
//! callback returns; nothing here blocks except an explicit
//! [`AdmissionPolicy::Block`](crate::AdmissionPolicy::Block) queue.
//!
//! The sink is created before negotiation (the session needs it to install
//! its delegate) and learns the stream layout afterwards through
//! [`QueueSink::declare`]. Frames offered before that are refused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bmd_core::{AudioPacket, FrameSink, SinkError, StopReason, StopSignal, VideoFrame};
use bytes::Bytes;
use tracing::{info, warn};

use crate::layout::StreamLayout;
use crate::packet::MediaPacket;
use crate::queue::{PacketQueue, QueueError};

/// Verbose status line cadence, in video frames.
const STATUS_EVERY: u64 = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub video_frames:  u64,
    pub audio_packets: u64,
    pub refused:       u64,
}

/// Per-stream arithmetic fixed by the declared layout.
#[derive(Debug, Clone, Copy)]
struct PacketFormat {
    /// Video timestamps arrive in 1/den units; pts count frames.
    video_tb_num: i64,
    audio_tb_num: i64,
    /// Bytes per interleaved audio sample frame.
    audio_block:  usize,
}

pub struct QueueSink {
    queue:         Arc<PacketQueue>,
    format:        OnceLock<PacketFormat>,
    max_frames:    Option<u64>,
    stop:          StopSignal,
    verbose:       bool,
    video_frames:  AtomicU64,
    audio_packets: AtomicU64,
    refused:       AtomicU64,
}

impl QueueSink {
    pub fn new(queue: Arc<PacketQueue>, stop: StopSignal) -> Self {
        Self {
            queue,
            format:        OnceLock::new(),
            max_frames:    None,
            stop,
            verbose:       false,
            video_frames:  AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            refused:       AtomicU64::new(0),
        }
    }

    /// Fix the output streams. Only the first declaration takes effect.
    pub fn declare(&self, layout: &StreamLayout) -> bool {
        self.format
            .set(PacketFormat {
                video_tb_num: layout.video.timebase.num.max(1),
                audio_tb_num: layout.audio.timebase.num.max(1),
                audio_block:  layout.audio.block_align() as usize,
            })
            .is_ok()
    }

    fn packet_format(&self) -> Result<PacketFormat, SinkError> {
        self.format.get().copied().ok_or_else(|| {
            self.refused.fetch_add(1, Ordering::Relaxed);
            SinkError::Dropped("stream layout not declared".into())
        })
    }

    /// Trigger [`StopReason::FrameLimit`] after `max` video frames.
    pub fn with_max_frames(mut self, max: Option<u64>) -> Self {
        self.max_frames = max.filter(|&n| n > 0);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            video_frames:  self.video_frames.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            refused:       self.refused.load(Ordering::Relaxed),
        }
    }

    fn offer(&self, packet: MediaPacket) -> Result<(), SinkError> {
        self.queue.put(packet).map_err(|e| {
            let n = self.refused.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                QueueError::Aborted => SinkError::Closed,
                full @ QueueError::Full { .. } => {
                    if n <= 10 || n % 100 == 0 {
                        warn!("Queue over its memory limit, frame dropped ({} total): {}", n, full);
                    }
                    SinkError::Dropped(full.to_string())
                }
            }
        })
    }
}

impl FrameSink for QueueSink {
    fn video_frame(&self, frame: VideoFrame<'_>) -> Result<(), SinkError> {
        if let Some(max) = self.max_frames {
            if self.video_frames.load(Ordering::Relaxed) >= max {
                self.stop.trigger(StopReason::FrameLimit);
                return Err(SinkError::Closed);
            }
        }

        let format = self.packet_format()?;
        let len = frame.payload_len().min(frame.data.len());
        let packet = MediaPacket::video(
            Bytes::copy_from_slice(&frame.data[..len]),
            frame.timestamp / format.video_tb_num,
            frame.duration / format.video_tb_num,
        );
        self.offer(packet)?;

        let n = self.video_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if self.verbose && n % STATUS_EVERY == 0 {
            info!(
                "Frame received (#{}) - Valid ({}B) - QSize {:.2} MiB",
                n,
                len,
                self.queue.size() as f64 / (1024.0 * 1024.0),
            );
        }
        if self.max_frames == Some(n) && self.stop.trigger(StopReason::FrameLimit) {
            info!("Frame limit reached ({} frames)", n);
        }
        Ok(())
    }

    fn audio_packet(&self, packet: AudioPacket<'_>) -> Result<(), SinkError> {
        let format = self.packet_format()?;
        let len = (packet.sample_count as usize * format.audio_block).min(packet.data.len());
        let packet = MediaPacket::audio(
            Bytes::copy_from_slice(&packet.data[..len]),
            packet.timestamp / format.audio_tb_num,
        );
        self.offer(packet)?;
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmd_core::{CaptureConfig, FieldMode, Rational, ResolvedGeometry};

    use crate::queue::{AdmissionPolicy, Pop};

    fn layout(timebase: Rational) -> StreamLayout {
        let mut cfg = CaptureConfig { video_mode: 0, ..Default::default() };
        let geometry = ResolvedGeometry {
            width: 4,
            height: 2,
            field_mode: FieldMode::LowerFieldFirst,
            timebase,
        };
        StreamLayout::derive(&geometry, &cfg.validate().unwrap())
    }

    fn declared(queue: &Arc<PacketQueue>, timebase: Rational, stop: StopSignal) -> QueueSink {
        let sink = QueueSink::new(queue.clone(), stop);
        assert!(sink.declare(&layout(timebase)));
        sink
    }

    fn frame(data: &[u8], timestamp: i64, duration: i64) -> VideoFrame<'_> {
        VideoFrame { data, width: 4, height: 2, stride: 8, timestamp, duration, flags: 0 }
    }

    #[test]
    fn video_pts_divides_by_timebase_numerator() {
        let queue = Arc::new(PacketQueue::default());
        let sink = declared(&queue, Rational::new(1001, 30000), StopSignal::new());
        let data = [3u8; 32];
        sink.video_frame(frame(&data, 2 * 1001, 1001)).unwrap();
        let Pop::Packet(p) = queue.get(false) else { panic!("no packet") };
        assert_eq!(p.pts, 2);
        assert_eq!(p.duration, 1);
        // stride * height, not the whole buffer
        assert_eq!(p.data.len(), 16);
    }

    #[test]
    fn audio_size_from_sample_count() {
        let queue = Arc::new(PacketQueue::default());
        let sink = declared(&queue, Rational::new(1, 25), StopSignal::new());
        let data = vec![0u8; 4096];
        sink.audio_packet(AudioPacket { data: &data, sample_count: 100, timestamp: 1920, flags: 0 })
            .unwrap();
        let Pop::Packet(p) = queue.get(false) else { panic!("no packet") };
        assert_eq!(p.data.len(), 100 * 2 * 2);
        assert_eq!(p.pts, 1920);
    }

    #[test]
    fn frame_limit_triggers_stop() {
        let queue = Arc::new(PacketQueue::default());
        let stop = StopSignal::new();
        let sink = declared(&queue, Rational::new(1, 25), stop.clone()).with_max_frames(Some(3));
        let data = [0u8; 16];
        for i in 0..3 {
            sink.video_frame(frame(&data, i, 1)).unwrap();
        }
        assert_eq!(stop.reason(), Some(StopReason::FrameLimit));
        assert_eq!(sink.video_frame(frame(&data, 3, 1)), Err(SinkError::Closed));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn frames_before_declare_are_refused() {
        let queue = Arc::new(PacketQueue::default());
        let sink = QueueSink::new(queue.clone(), StopSignal::new());
        let data = [0u8; 16];
        assert!(matches!(sink.video_frame(frame(&data, 0, 1)), Err(SinkError::Dropped(_))));
        assert!(sink.declare(&layout(Rational::new(1, 25))));
        assert!(!sink.declare(&layout(Rational::new(1, 50))));
        sink.video_frame(frame(&data, 1, 1)).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn refusals_map_to_sink_errors() {
        let queue = Arc::new(PacketQueue::new(0, AdmissionPolicy::DropNewest));
        let sink = declared(&queue, Rational::new(1, 25), StopSignal::new());
        let data = [0u8; 16];
        assert!(matches!(sink.video_frame(frame(&data, 0, 1)), Err(SinkError::Dropped(_))));
        queue.abort();
        assert_eq!(sink.video_frame(frame(&data, 1, 1)), Err(SinkError::Closed));
        assert_eq!(sink.stats().refused, 2);
        assert_eq!(sink.stats().video_frames, 0);
    }
}
