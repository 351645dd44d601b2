//! The DeckLink SDK surface this crate drives.
//!
//! The vendor SDK is an external collaborator: device communication lives
//! behind these traits and is never reimplemented here. A binding to the
//! real driver implements them; so does [`crate::sim`].
//!
//! # Object model
//!
//! ```text
//! DeckLinkApi ──► DeviceIterator ──► Device ─┬─► Input ──► DisplayModeIterator ──► DisplayMode
//!                                            ├─► Output ─► DisplayModeIterator
//!                                            ├─► Configuration
//!                                            └─► Attributes
//!
//! Input::set_callback(InputCallback) ◄── frames arrive on the hardware thread
//! ```
//!
//! Ownership replaces AddRef/Release: every handle is an owned value or an
//! `Arc`, and dropping the last reference releases it. The input callback is
//! shared between the session and the hardware runtime through an `Arc`, so
//! it is destroyed exactly when both have let go.

use std::sync::Arc;

use bmd_core::{
    AudioConnection, DisplayModeId, DisplayModeInfo, FieldDominance, HwError, PixelFormat,
    Rational, VideoConnection,
};

// ── Flag sets ─────────────────────────────────────────────────────────────────

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $value:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self($value);)*

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(
    /// Flags passed to [`Input::enable_video_input`].
    VideoInputFlags {
        /// Ask the hardware to report the incoming signal's format.
        FORMAT_DETECTION = 1 << 0,
        DUAL_STREAM_3D = 1 << 1,
    }
);

flag_set!(
    /// Per-frame flags on a [`VideoInputFrame`].
    FrameFlags {
        FLIP_VERTICAL = 1 << 0,
        /// The frame carries no picture: the input has lost its signal.
        NO_INPUT_SOURCE = 1 << 31,
    }
);

flag_set!(
    /// What changed in a [`InputCallback::video_input_format_changed`] event.
    FormatChangedEvents {
        DISPLAY_MODE_CHANGED = 1 << 0,
        FIELD_DOMINANCE_CHANGED = 1 << 1,
        COLORSPACE_CHANGED = 1 << 2,
    }
);

flag_set!(
    /// Properties of a detected input signal.
    DetectedFormatFlags {
        YCBCR_422 = 1 << 0,
        RGB_444 = 1 << 1,
        DUAL_STREAM_3D = 1 << 2,
    }
);

// ── Device discovery ──────────────────────────────────────────────────────────

/// Entry point of the SDK: hands out device iterators.
pub trait DeckLinkApi: Send + Sync {
    fn iterator(&self) -> Result<Box<dyn DeviceIterator>, HwError>;
}

pub trait DeviceIterator: Send {
    fn next_device(&mut self) -> Option<Arc<dyn Device>>;
}

/// One physical capture card. Capabilities the card lacks return `None`.
pub trait Device: Send + Sync {
    fn model_name(&self) -> String;

    fn input(&self) -> Option<Arc<dyn Input>>;

    fn output(&self) -> Option<Arc<dyn Output>>;

    fn configuration(&self) -> Option<Arc<dyn Configuration>>;

    fn attributes(&self) -> Option<Arc<dyn Attributes>>;
}

// ── Display modes ─────────────────────────────────────────────────────────────

pub trait DisplayModeIterator: Send {
    fn next_mode(&mut self) -> Option<Box<dyn DisplayMode>>;
}

pub trait DisplayMode: Send + Sync {
    fn id(&self) -> DisplayModeId;

    /// `None` when the SDK cannot produce a name for the mode.
    fn name(&self) -> Option<String>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Frame duration / time scale.
    fn frame_rate(&self) -> Rational;

    fn field_dominance(&self) -> FieldDominance;

    fn flags(&self) -> u32;

    fn info(&self) -> DisplayModeInfo {
        DisplayModeInfo {
            id: self.id(),
            name: self.name().unwrap_or_default(),
            width: self.width(),
            height: self.height(),
            frame_rate: self.frame_rate(),
            field_dominance: self.field_dominance(),
            flags: self.flags(),
        }
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

pub trait Input: Send + Sync {
    fn display_modes(&self) -> Result<Box<dyn DisplayModeIterator>, HwError>;

    /// Install (or with `None`, remove) the frame-arrival callback.
    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> Result<(), HwError>;

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        format: PixelFormat,
        flags: VideoInputFlags,
    ) -> Result<(), HwError>;

    fn disable_video_input(&self) -> Result<(), HwError>;

    fn enable_audio_input(
        &self,
        sample_rate: u32,
        sample_depth: u32,
        channels: u32,
    ) -> Result<(), HwError>;

    fn disable_audio_input(&self) -> Result<(), HwError>;

    fn start_streams(&self) -> Result<(), HwError>;

    fn stop_streams(&self) -> Result<(), HwError>;
}

pub trait Output: Send + Sync {
    fn display_modes(&self) -> Result<Box<dyn DisplayModeIterator>, HwError>;
}

pub trait Configuration: Send + Sync {
    fn set_video_input_connection(&self, connection: VideoConnection) -> Result<(), HwError>;

    fn set_audio_input_connection(&self, connection: AudioConnection) -> Result<(), HwError>;
}

pub trait Attributes: Send + Sync {
    fn supports_input_format_detection(&self) -> Result<bool, HwError>;
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// A video frame owned by the hardware. Valid only for the duration of the
/// callback that received it.
pub trait VideoInputFrame {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn row_bytes(&self) -> u32;

    fn flags(&self) -> FrameFlags;

    fn bytes(&self) -> &[u8];

    /// `(time, duration)` expressed in units of `1 / time_scale` seconds.
    fn stream_time(&self, time_scale: i64) -> Result<(i64, i64), HwError>;
}

/// A block of interleaved audio owned by the hardware.
pub trait AudioInputPacket {
    fn sample_frame_count(&self) -> u32;

    fn bytes(&self) -> &[u8];

    fn packet_time(&self, time_scale: i64) -> Result<i64, HwError>;
}

/// Receiver of hardware events, invoked on the SDK's internal thread.
pub trait InputCallback: Send + Sync {
    fn video_input_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &dyn DisplayMode,
        flags: DetectedFormatFlags,
    );

    /// Either argument may be absent on a given invocation.
    fn video_input_frame_arrived(
        &self,
        video: Option<&dyn VideoInputFrame>,
        audio: Option<&dyn AudioInputPacket>,
    );
}
