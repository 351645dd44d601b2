//! Command-line surface, mirroring the classic `bmdcapture` flags.

use std::path::PathBuf;

use bmd_core::CaptureConfig;
use bmd_writer::{AdmissionPolicy, RecorderConfig};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "bmdcapture",
    about = "Capture video and audio from a Blackmagic DeckLink card into a file",
    disable_version_flag = true
)]
pub struct Cli {
    /// Verbose output (status line every 25 frames)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// List devices and their display modes, then exit
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Display mode index (-1 = auto-detect)
    #[arg(short = 'm', long = "mode", allow_negative_numbers = true)]
    pub video_mode: Option<i32>,

    /// Audio channels: 2, 8 or 16
    #[arg(short = 'c', long = "channels")]
    pub audio_channels: Option<u32>,

    /// Audio sample depth: 16 or 32
    #[arg(short = 's', long = "sample-depth", value_parser = parse_sample_depth)]
    pub audio_sample_depth: Option<u32>,

    /// Pixel depth: 8 (UYVY) or 10 (v210)
    #[arg(short = 'p', long = "pixel-depth", value_parser = parse_pixel_depth)]
    pub pixel_format: Option<u32>,

    /// Output file
    #[arg(short = 'f', long = "file")]
    pub output: Option<PathBuf>,

    /// Stop after this many video frames
    #[arg(short = 'n', long = "frames")]
    pub max_frames: Option<u64>,

    /// Queue memory limit in GiB
    #[arg(short = 'M', long = "memory-limit")]
    pub memory_limit_gib: Option<u64>,

    /// Container format (raw, mkv, mov, avi); guessed from -f otherwise
    #[arg(short = 'F', long = "format")]
    pub format: Option<String>,

    /// Audio input: 1 = analog, 2 = embedded
    #[arg(short = 'A', long = "audio-input")]
    pub audio_connection: Option<i32>,

    /// Video input: 1 = composite, 2 = component, 3 = HDMI, 4 = SDI
    #[arg(short = 'V', long = "video-input")]
    pub video_connection: Option<i32>,

    /// Card index
    #[arg(short = 'C', long = "card")]
    pub instance: Option<u32>,

    /// JSON file with `capture` and `recorder` sections
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for a signal when auto-detecting (0 = forever)
    #[arg(long = "probe-timeout")]
    pub probe_timeout: Option<f64>,

    /// What to do with video when the queue is full: newest, oldest, block
    #[arg(long = "drop-policy")]
    pub drop_policy: Option<AdmissionPolicy>,

    /// Use the built-in simulated DeckLink card
    #[arg(long)]
    pub simulate: bool,
}

fn parse_sample_depth(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(bits @ (16 | 32)) => Ok(bits),
        _ => Err("Audio sample depth must be either 16 or 32 bits".into()),
    }
}

/// Maps the bit depth onto the pixel-format index.
fn parse_pixel_depth(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(8) => Ok(0),
        Ok(10) => Ok(1),
        _ => Err("Pixel Format Depth must be either 8 bits or 10 bits".into()),
    }
}

impl Cli {
    /// Overlay the command-line values onto (file-loaded) configuration.
    pub fn apply(&self, capture: &mut CaptureConfig, recorder: &mut RecorderConfig) {
        if let Some(v) = self.instance {
            capture.instance = v;
        }
        if let Some(v) = self.video_connection {
            capture.video_connection = v;
        }
        if let Some(v) = self.video_mode {
            capture.video_mode = v;
        }
        if let Some(v) = self.pixel_format {
            capture.pixel_format = v;
        }
        if let Some(v) = self.audio_connection {
            capture.audio_connection = v;
        }
        if let Some(v) = self.audio_channels {
            capture.audio_channels = v;
        }
        if let Some(v) = self.audio_sample_depth {
            capture.audio_sample_depth = v;
        }

        if self.output.is_some() {
            recorder.output = self.output.clone();
        }
        if self.format.is_some() {
            recorder.format = self.format.clone();
        }
        if let Some(v) = self.memory_limit_gib {
            recorder.memory_limit_gib = v;
        }
        if let Some(v) = self.drop_policy {
            recorder.drop_policy = v;
        }
        if self.max_frames.is_some() {
            recorder.max_frames = self.max_frames;
        }
        if let Some(secs) = self.probe_timeout {
            recorder.probe_timeout_secs = Some(secs);
        }
        recorder.verbose |= self.verbose;
    }
}
