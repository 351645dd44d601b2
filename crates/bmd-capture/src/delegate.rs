//! `CaptureDelegate`: the input callback installed for a capture session.
//!
//! Runs on the hardware's callback thread:
//!
//! ```text
//! SDK thread ──► video_input_frame_arrived ──► FrameSink::video_frame
//!                                          └─► FrameSink::audio_packet
//! ```
//!
//! The delegate never blocks and never fails the callback: frames without a
//! signal are skipped, timing errors and sink refusals are counted and
//! logged at a bounded rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bmd_core::{AudioPacket, FrameSink, VideoFrame, AUDIO_SAMPLE_RATE};
use tracing::{debug, warn};

use crate::sdk::{
    AudioInputPacket, DetectedFormatFlags, DisplayMode, FormatChangedEvents, FrameFlags,
    InputCallback, VideoInputFrame,
};

// ── Statistics ────────────────────────────────────────────────────────────────

/// Snapshot of a delegate's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelegateStats {
    pub video_frames:   u64,
    pub audio_packets:  u64,
    /// Callbacks whose video frame was flagged "no input source".
    pub no_signal:      u64,
    pub sink_errors:    u64,
    pub timing_errors:  u64,
    pub format_changes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    video_frames:   AtomicU64,
    audio_packets:  AtomicU64,
    no_signal:      AtomicU64,
    sink_errors:    AtomicU64,
    timing_errors:  AtomicU64,
    format_changes: AtomicU64,
}

fn rate_limited(count: u64) -> bool {
    count <= 10 || count % 100 == 0
}

// ── CaptureDelegate ───────────────────────────────────────────────────────────

pub struct CaptureDelegate {
    sink:       Arc<dyn FrameSink>,
    /// Video time scale: the denominator of the negotiated timebase.
    time_scale: i64,
    counters:   Counters,
}

impl CaptureDelegate {
    pub fn new(sink: Arc<dyn FrameSink>, time_scale: i64) -> Self {
        Self { sink, time_scale, counters: Counters::default() }
    }

    pub fn stats(&self) -> DelegateStats {
        let c = &self.counters;
        DelegateStats {
            video_frames:   c.video_frames.load(Ordering::Relaxed),
            audio_packets:  c.audio_packets.load(Ordering::Relaxed),
            no_signal:      c.no_signal.load(Ordering::Relaxed),
            sink_errors:    c.sink_errors.load(Ordering::Relaxed),
            timing_errors:  c.timing_errors.load(Ordering::Relaxed),
            format_changes: c.format_changes.load(Ordering::Relaxed),
        }
    }

    fn deliver_video(&self, frame: &dyn VideoInputFrame) {
        let (timestamp, duration) = match frame.stream_time(self.time_scale) {
            Ok(t) => t,
            Err(e) => {
                let n = self.counters.timing_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if rate_limited(n) {
                    warn!("Video stream time unavailable (#{}): {}", n, e);
                }
                return;
            }
        };
        let result = self.sink.video_frame(VideoFrame {
            data:   frame.bytes(),
            width:  frame.width(),
            height: frame.height(),
            stride: frame.row_bytes(),
            timestamp,
            duration,
            flags:  frame.flags().0 as i64,
        });
        match result {
            Ok(()) => {
                self.counters.video_frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.sink_failed("video", e),
        }
    }

    fn deliver_audio(&self, packet: &dyn AudioInputPacket) {
        let timestamp = match packet.packet_time(AUDIO_SAMPLE_RATE as i64) {
            Ok(t) => t,
            Err(e) => {
                let n = self.counters.timing_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if rate_limited(n) {
                    warn!("Audio packet time unavailable (#{}): {}", n, e);
                }
                return;
            }
        };
        let result = self.sink.audio_packet(AudioPacket {
            data:         packet.bytes(),
            sample_count: packet.sample_frame_count(),
            timestamp,
            flags:        0,
        });
        match result {
            Ok(()) => {
                self.counters.audio_packets.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.sink_failed("audio", e),
        }
    }

    fn sink_failed(&self, kind: &str, err: bmd_core::SinkError) {
        let n = self.counters.sink_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if rate_limited(n) {
            warn!("Sink refused {} ({} total): {}", kind, n, err);
        }
    }
}

impl InputCallback for CaptureDelegate {
    fn video_input_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &dyn DisplayMode,
        _flags: DetectedFormatFlags,
    ) {
        let n = self.counters.format_changes.fetch_add(1, Ordering::Relaxed) + 1;
        // The session does not re-negotiate; the muxer keeps the negotiated geometry.
        warn!(
            "Input format changed mid-capture (#{}, events={:#x}): now {} {}x{}",
            n,
            events.0,
            mode.name().unwrap_or_else(|| mode.id().to_string()),
            mode.width(),
            mode.height(),
        );
    }

    fn video_input_frame_arrived(
        &self,
        video: Option<&dyn VideoInputFrame>,
        audio: Option<&dyn AudioInputPacket>,
    ) {
        if let Some(frame) = video {
            if frame.flags().contains(FrameFlags::NO_INPUT_SOURCE) {
                let n = self.counters.no_signal.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 100 == 0 {
                    debug!("No input signal ({} frames skipped)", n);
                }
                // The audio accompanying a signal-less frame is dropped with it.
                return;
            }
            self.deliver_video(frame);
        }
        if let Some(packet) = audio {
            self.deliver_audio(packet);
        }
    }
}

impl Drop for CaptureDelegate {
    fn drop(&mut self) {
        debug!("Capture delegate released: {:?}", self.stats());
    }
}
