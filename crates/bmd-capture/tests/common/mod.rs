use std::sync::Mutex;
use std::time::{Duration, Instant};

use bmd_core::{AudioPacket, FrameSink, SinkError, VideoFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenFrame {
    pub timestamp: i64,
    pub duration:  i64,
    pub width:     u32,
    pub height:    u32,
    pub stride:    u32,
    pub len:       usize,
    pub first:     i64,
}

/// Sink that records what it was given.
#[derive(Default)]
pub struct RecordingSink {
    pub video: Mutex<Vec<SeenFrame>>,
    pub audio: Mutex<Vec<(i64, u32, usize)>>,
}

impl RecordingSink {
    pub fn video_count(&self) -> usize {
        self.video.lock().unwrap().len()
    }

    /// Poll until at least `n` video frames arrived or `timeout` passes.
    pub fn wait_for_video(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.video_count() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.video_count() >= n
    }
}

impl FrameSink for RecordingSink {
    fn video_frame(&self, frame: VideoFrame<'_>) -> Result<(), SinkError> {
        let mut first = [0u8; 8];
        first.copy_from_slice(&frame.data[..8]);
        self.video.lock().unwrap().push(SeenFrame {
            timestamp: frame.timestamp,
            duration:  frame.duration,
            width:     frame.width,
            height:    frame.height,
            stride:    frame.stride,
            len:       frame.data.len(),
            first:     i64::from_le_bytes(first),
        });
        Ok(())
    }

    fn audio_packet(&self, packet: AudioPacket<'_>) -> Result<(), SinkError> {
        self.audio.lock().unwrap().push((packet.timestamp, packet.sample_count, packet.data.len()));
        Ok(())
    }
}
