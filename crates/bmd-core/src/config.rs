use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::types::{
    AudioConnection, ModeSelection, PixelFormat, ResolvedGeometry, VideoConnection, PIXEL_FORMATS,
};

/// `video_mode` value requesting automatic format detection.
pub const AUTO_DETECT_MODE: i32 = -1;

pub const LEGAL_AUDIO_CHANNELS: [u32; 3] = [2, 8, 16];
pub const LEGAL_SAMPLE_DEPTHS: [u32; 2] = [16, 32];

/// Capture configuration, as supplied on the command line or in a config file.
///
/// All fields are the plain integer codes of the configuration surface;
/// [`CaptureConfig::validate`] turns them into typed [`CaptureParams`].
/// Negotiation writes the resolved geometry back into `geometry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Zero-based device index.
    pub instance: u32,
    /// 0 = unchanged, 1 = composite, 2 = component, 3 = HDMI, 4 = SDI.
    #[serde(alias = "videoConnection")]
    pub video_connection: i32,
    /// Display-mode index, or -1 to auto-detect.
    #[serde(alias = "videoMode")]
    pub video_mode: i32,
    /// Index into [`PIXEL_FORMATS`].
    #[serde(alias = "pixelFormat")]
    pub pixel_format: u32,
    /// 0 = unchanged, 1 = analog, 2 = embedded.
    #[serde(alias = "audioConnection")]
    pub audio_connection: i32,
    /// 2, 8 or 16 (0 selects 2).
    #[serde(alias = "audioChannels")]
    pub audio_channels: u32,
    /// 16 or 32 (0 selects 16).
    #[serde(alias = "audioSampleDepth")]
    pub audio_sample_depth: u32,
    #[serde(skip)]
    pub geometry: Option<ResolvedGeometry>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            instance: 0,
            video_connection: 0,
            video_mode: AUTO_DETECT_MODE,
            pixel_format: 0,
            audio_connection: 0,
            audio_channels: 2,
            audio_sample_depth: 16,
            geometry: None,
        }
    }
}

/// Validated view of a [`CaptureConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub instance: usize,
    pub video_connection: VideoConnection,
    pub audio_connection: AudioConnection,
    pub mode: ModeSelection,
    pub pixel_format: PixelFormat,
    pub audio_channels: u32,
    pub audio_sample_depth: u32,
}

impl CaptureConfig {
    /// Normalise defaults in place (0 channels → 2, 0 bits → 16) and check
    /// every code against its legal set.
    pub fn validate(&mut self) -> Result<CaptureParams, CaptureError> {
        if self.audio_channels == 0 {
            self.audio_channels = 2;
        }
        if !LEGAL_AUDIO_CHANNELS.contains(&self.audio_channels) {
            return Err(CaptureError::InvalidAudioChannels(self.audio_channels));
        }

        if self.audio_sample_depth == 0 {
            self.audio_sample_depth = 16;
        }
        if !LEGAL_SAMPLE_DEPTHS.contains(&self.audio_sample_depth) {
            return Err(CaptureError::InvalidSampleDepth(self.audio_sample_depth));
        }

        let pixel_format =
            PixelFormat::from_index(self.pixel_format).ok_or(CaptureError::InvalidPixelFormat {
                index: self.pixel_format,
                available: PIXEL_FORMATS.len(),
            })?;

        let video_connection = VideoConnection::from_code(self.video_connection).ok_or(
            CaptureError::InvalidConnection { kind: "video", code: self.video_connection },
        )?;
        let audio_connection = AudioConnection::from_code(self.audio_connection).ok_or(
            CaptureError::InvalidConnection { kind: "audio", code: self.audio_connection },
        )?;

        let mode = match self.video_mode {
            AUTO_DETECT_MODE => ModeSelection::AutoDetect,
            n if n >= 0 => ModeSelection::Index(n as usize),
            n => return Err(CaptureError::InvalidDisplayMode(n)),
        };

        Ok(CaptureParams {
            instance: self.instance as usize,
            video_connection,
            audio_connection,
            mode,
            pixel_format,
            audio_channels: self.audio_channels,
            audio_sample_depth: self.audio_sample_depth,
        })
    }

    /// Record the outcome of display-mode negotiation.
    pub fn apply_geometry(&mut self, geometry: ResolvedGeometry) {
        self.geometry = Some(geometry);
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
