use std::fmt;

use serde::{Deserialize, Serialize};

/// Audio is always captured at 48 kHz.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

fn fmt_fourcc(code: u32, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let bytes = code.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        write!(f, "'{}'", String::from_utf8_lossy(&bytes))
    } else {
        write!(f, "{:#010x}", code)
    }
}

// MARK: - Rational

/// A fraction, used for frame rates and timebases.
///
/// DeckLink reports a frame rate as `(frame duration, time scale)`, which is
/// exactly the timebase `num/den` a muxer wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Frames per second when this fraction is a frame duration.
    pub fn fps(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        self.den as f64 / self.num as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// MARK: - DisplayModeId

/// Hardware identity of a display mode (a four-character code such as `'Hp25'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayModeId(pub u32);

impl DisplayModeId {
    pub const fn from_fourcc(code: &[u8; 4]) -> Self {
        Self(fourcc(code))
    }
}

impl fmt::Display for DisplayModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fourcc(self.0, f)
    }
}

// MARK: - FieldDominance

/// Raw field-dominance value as reported by the hardware.
///
/// Kept as the raw code because the hardware may report values this crate
/// does not know about; [`FieldMode::from_dominance`] decides what is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDominance(pub u32);

impl FieldDominance {
    pub const UNKNOWN: Self = Self(0);
    pub const LOWER_FIELD_FIRST: Self = Self(fourcc(b"lowr"));
    pub const UPPER_FIELD_FIRST: Self = Self(fourcc(b"uppr"));
    pub const PROGRESSIVE: Self = Self(fourcc(b"prog"));
    pub const PROGRESSIVE_SEGMENTED: Self = Self(fourcc(b"psf "));
}

impl fmt::Display for FieldDominance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNKNOWN {
            return f.write_str("unknown");
        }
        fmt_fourcc(self.0, f)
    }
}

// MARK: - FieldMode

/// Five-state field mode handed to the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FieldMode {
    Unknown = 0,
    LowerFieldFirst = 1,
    UpperFieldFirst = 2,
    Progressive = 3,
    ProgressiveSegmented = 4,
}

impl FieldMode {
    /// Map a hardware field dominance onto the field mode.
    /// Returns `None` for values the hardware should never report.
    pub fn from_dominance(dominance: FieldDominance) -> Option<Self> {
        match dominance {
            FieldDominance::UNKNOWN => Some(Self::Unknown),
            FieldDominance::LOWER_FIELD_FIRST => Some(Self::LowerFieldFirst),
            FieldDominance::UPPER_FIELD_FIRST => Some(Self::UpperFieldFirst),
            FieldDominance::PROGRESSIVE => Some(Self::Progressive),
            FieldDominance::PROGRESSIVE_SEGMENTED => Some(Self::ProgressiveSegmented),
            _ => None,
        }
    }

    pub fn as_index(self) -> u8 {
        self as u8
    }

    pub fn is_interlaced(self) -> bool {
        matches!(self, Self::LowerFieldFirst | Self::UpperFieldFirst)
    }
}

// MARK: - PixelFormat

/// Pixel formats a capture can be negotiated with, indexed by the
/// configuration's `pixel_format` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit 4:2:2 YUV (UYVY byte order).
    Yuv8,
    /// 10-bit 4:2:2 YUV packed as v210.
    Yuv10,
    /// 8-bit ARGB.
    Argb8,
    /// 10-bit RGB (r210).
    Rgb10,
    /// 8-bit BGRA.
    Bgra8,
}

/// Supported pixel-format table, in configuration-index order.
pub const PIXEL_FORMATS: [PixelFormat; 5] = [
    PixelFormat::Yuv8,
    PixelFormat::Yuv10,
    PixelFormat::Argb8,
    PixelFormat::Rgb10,
    PixelFormat::Bgra8,
];

impl PixelFormat {
    pub fn from_index(index: u32) -> Option<Self> {
        PIXEL_FORMATS.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Yuv8 => "8-bit YUV",
            Self::Yuv10 => "10-bit YUV",
            Self::Argb8 => "8-bit ARGB",
            Self::Rgb10 => "10-bit RGB",
            Self::Bgra8 => "8-bit BGRA",
        }
    }

    /// Bytes per row for a frame of `width` pixels, including the padding
    /// the packed 10-bit layouts require.
    pub fn row_bytes(self, width: u32) -> u32 {
        match self {
            Self::Yuv8 => width * 2,
            Self::Yuv10 => width.div_ceil(48) * 128,
            Self::Argb8 | Self::Bgra8 => width * 4,
            Self::Rgb10 => width.div_ceil(64) * 256,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// MARK: - Connections

/// Video input connector. `Unchanged` leaves the hardware default alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoConnection {
    Unchanged,
    Composite,
    Component,
    Hdmi,
    Sdi,
}

impl VideoConnection {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unchanged),
            1 => Some(Self::Composite),
            2 => Some(Self::Component),
            3 => Some(Self::Hdmi),
            4 => Some(Self::Sdi),
            _ => None,
        }
    }
}

/// Audio input connector. `Unchanged` leaves the hardware default alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioConnection {
    Unchanged,
    Analog,
    Embedded,
}

impl AudioConnection {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unchanged),
            1 => Some(Self::Analog),
            2 => Some(Self::Embedded),
            _ => None,
        }
    }
}

// MARK: - ModeSelection

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    /// Zero-based index into the device's display-mode list.
    Index(usize),
    /// Run the format probe to find out.
    AutoDetect,
}

// MARK: - ResolvedGeometry

/// Outcome of display-mode negotiation, consumed by the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGeometry {
    pub width: u32,
    pub height: u32,
    pub field_mode: FieldMode,
    pub timebase: Rational,
}

// MARK: - Direction

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Set of directions an enumeration should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDirections {
    pub input: bool,
    pub output: bool,
}

impl IoDirections {
    pub const INPUT: Self = Self { input: true, output: false };
    pub const OUTPUT: Self = Self { input: false, output: true };
    pub const ANY: Self = Self { input: true, output: true };

    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }
}

// MARK: - DisplayModeInfo

/// Owned snapshot of one display mode, as reported during enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayModeInfo {
    pub id: DisplayModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub field_dominance: FieldDominance,
    pub flags: u32,
}
