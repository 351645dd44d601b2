use std::time::Duration;

use thiserror::Error;

use crate::types::{DisplayModeId, FieldDominance};

/// Status returned by the hardware collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwError {
    #[error("operation not supported by the device")]
    Unsupported,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("device busy")]
    Busy,

    #[error("hardware call failed (status {0:#010x})")]
    Failed(i32),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    // -- Configuration (rejected before any hardware call) --
    #[error("Invalid audio channel count {0} (expected 2, 8 or 16)")]
    InvalidAudioChannels(u32),

    #[error("Invalid audio sample depth {0} (expected 16 or 32)")]
    InvalidSampleDepth(u32),

    #[error("Invalid pixel format index {index} ({available} formats supported)")]
    InvalidPixelFormat { index: u32, available: usize },

    #[error("Invalid {kind} connection code {code}")]
    InvalidConnection { kind: &'static str, code: i32 },

    #[error("Invalid display mode index {0} (use -1 to auto-detect)")]
    InvalidDisplayMode(i32),

    // -- Resource acquisition --
    #[error("DeckLink device iterator unavailable: {0}")]
    IteratorUnavailable(#[source] HwError),

    #[error("DeckLink device #{instance} not found ({available} device(s) present)")]
    DeviceNotFound { instance: usize, available: usize },

    #[error("Device does not expose the {0} interface")]
    InterfaceUnsupported(&'static str),

    #[error("Display mode #{index} out of range ({available} mode(s) available)")]
    DisplayModeOutOfRange { index: usize, available: usize },

    #[error("Unrecognised field dominance {0}")]
    UnknownFieldDominance(FieldDominance),

    #[error("{op} failed: {source}")]
    Hardware {
        op: &'static str,
        #[source]
        source: HwError,
    },

    // -- Format detection --
    #[error("Device does not support input format detection")]
    FormatDetectionUnsupported,

    #[error("Format probe timed out after {0:?} without a signal")]
    ProbeTimedOut(Duration),

    #[error("Format probe cancelled by a stop request")]
    ProbeCancelled,

    #[error("Detected display mode {0} is not in the device's mode list")]
    DetectedModeNotFound(DisplayModeId),

    // -- Streaming --
    #[error("Streams are already running")]
    AlreadyStreaming,
}

impl CaptureError {
    /// Adapter for `map_err` on hardware calls.
    pub fn hardware(op: &'static str) -> impl FnOnce(HwError) -> Self {
        move |source| Self::Hardware { op, source }
    }

    /// True for errors detected purely from the configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidAudioChannels(_)
                | Self::InvalidSampleDepth(_)
                | Self::InvalidPixelFormat { .. }
                | Self::InvalidConnection { .. }
                | Self::InvalidDisplayMode(_)
        )
    }

    /// True for errors raised by the format-probe path.
    pub fn is_format_detection(&self) -> bool {
        matches!(
            self,
            Self::FormatDetectionUnsupported
                | Self::ProbeTimedOut(_)
                | Self::ProbeCancelled
                | Self::DetectedModeNotFound(_)
        )
    }
}

/// Returned by a [`FrameSink`](crate::FrameSink) that did not accept a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("frame dropped: {0}")]
    Dropped(String),

    #[error("sink closed")]
    Closed,
}
