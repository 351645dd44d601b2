//! Output stream declarations derived from a negotiated capture.

use std::fmt;
use std::path::Path;

use bmd_core::{CaptureParams, FieldMode, PixelFormat, Rational, ResolvedGeometry, AUDIO_SAMPLE_RATE};

// MARK: - Codecs

/// Raw video layouts; nothing is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// 8-bit 4:2:2, UYVY byte order.
    RawUyvy,
    /// 10-bit 4:2:2 packed as v210.
    V210,
    RawArgb,
    /// 10-bit RGB packed as r210.
    R210,
    RawBgra,
}

impl VideoCodec {
    pub fn for_pixel_format(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Yuv8 => Self::RawUyvy,
            PixelFormat::Yuv10 => Self::V210,
            PixelFormat::Argb8 => Self::RawArgb,
            PixelFormat::Rgb10 => Self::R210,
            PixelFormat::Bgra8 => Self::RawBgra,
        }
    }

    /// Bits per raw sample component.
    pub fn bits_per_raw_sample(self) -> u32 {
        match self {
            Self::V210 | Self::R210 => 10,
            _ => 8,
        }
    }

    /// GStreamer `video/x-raw` format name.
    pub fn caps_format(self) -> &'static str {
        match self {
            Self::RawUyvy => "UYVY",
            Self::V210 => "v210",
            Self::RawArgb => "ARGB",
            Self::R210 => "r210",
            Self::RawBgra => "BGRA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    PcmS16Le,
    PcmS32Le,
}

impl AudioCodec {
    pub fn for_depth(bits: u32) -> Self {
        if bits == 32 {
            Self::PcmS32Le
        } else {
            Self::PcmS16Le
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::PcmS16Le => 16,
            Self::PcmS32Le => 32,
        }
    }

    pub fn caps_format(self) -> &'static str {
        match self {
            Self::PcmS16Le => "S16LE",
            Self::PcmS32Le => "S32LE",
        }
    }
}

// MARK: - StreamLayout

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStream {
    pub codec:      VideoCodec,
    pub width:      u32,
    pub height:     u32,
    pub field_mode: FieldMode,
    /// Frame duration / time scale; packet pts count frames.
    pub timebase:   Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStream {
    pub codec:       AudioCodec,
    pub sample_rate: u32,
    pub channels:    u32,
    /// Always 1/48000; packet pts count samples.
    pub timebase:    Rational,
}

impl AudioStream {
    /// Bytes per interleaved sample frame.
    pub fn block_align(&self) -> u32 {
        self.channels * self.codec.bits() / 8
    }
}

/// The two streams a capture declares to its muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub video: VideoStream,
    pub audio: AudioStream,
}

impl StreamLayout {
    pub fn derive(geometry: &ResolvedGeometry, params: &CaptureParams) -> Self {
        Self {
            video: VideoStream {
                codec:      VideoCodec::for_pixel_format(params.pixel_format),
                width:      geometry.width,
                height:     geometry.height,
                field_mode: geometry.field_mode,
                timebase:   geometry.timebase,
            },
            audio: AudioStream {
                codec:       AudioCodec::for_depth(params.audio_sample_depth),
                sample_rate: AUDIO_SAMPLE_RATE,
                channels:    params.audio_channels,
                timebase:    Rational::new(1, AUDIO_SAMPLE_RATE as i64),
            },
        }
    }
}

// MARK: - ContainerFormat

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Video frames back to back, audio in a sibling `.wav`.
    Raw,
    Matroska,
    QuickTime,
    Avi,
}

impl ContainerFormat {
    /// Look a format up by short name (`-F`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "raw" | "rawvideo" | "yuv" => Some(Self::Raw),
            "mkv" | "matroska" => Some(Self::Matroska),
            "mov" | "qt" | "quicktime" => Some(Self::QuickTime),
            "avi" => Some(Self::Avi),
            _ => None,
        }
    }

    /// Guess the format from the output file's extension.
    pub fn guess(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mkv" | "mka" => Some(Self::Matroska),
            "mov" | "qt" | "mp4" => Some(Self::QuickTime),
            "avi" => Some(Self::Avi),
            "raw" | "yuv" | "uyvy" | "v210" | "rgb" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Matroska => "matroska",
            Self::QuickTime => "quicktime",
            Self::Avi => "avi",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
