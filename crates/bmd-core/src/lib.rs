//! bmd-core: shared types for DeckLink capture.
//!
//! Everything the capture side (`bmd-capture`) and the file-writing side
//! (`bmd-writer`) need to agree on lives here: display-mode metadata, the
//! pixel-format table, connector codes, the negotiated geometry, the
//! [`FrameSink`] capability through which captured frames leave the hardware
//! thread, and the error taxonomy.

pub mod config;
pub mod errors;
pub mod frame;
pub mod stop;
pub mod types;

pub use config::{CaptureConfig, CaptureParams, AUTO_DETECT_MODE};
pub use errors::{CaptureError, HwError, SinkError};
pub use frame::{AudioPacket, FrameSink, VideoFrame};
pub use stop::{StopReason, StopSignal};
pub use types::*;
