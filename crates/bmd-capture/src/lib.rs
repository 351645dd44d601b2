//! DeckLink device negotiation and capture.
//!
//! - [`sdk`]: the vendor SDK surface, as traits
//! - [`DeviceSession`]: validate, configure, and stream one input
//! - [`probe_display_mode`]: detect the incoming signal's display mode
//! - [`CaptureDelegate`]: hardware callback → [`FrameSink`](bmd_core::FrameSink)
//! - [`enumerate_display_modes`] / [`list_devices`]: discovery
//! - [`sim`]: an in-process simulated card

pub mod delegate;
mod device;
pub mod enumerate;
pub mod probe;
pub mod sdk;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;

pub use delegate::{CaptureDelegate, DelegateStats};
pub use enumerate::{enumerate_display_modes, list_devices, DeviceSummary};
pub use probe::{probe_display_mode, Detection, ProbeOutcome, DEFAULT_PROBE_TIMEOUT, PROBE_POLL_INTERVAL};
pub use sdk::DeckLinkApi;
pub use session::{DeviceSession, SessionOptions};
