//! Automatic display-mode detection.
//!
//! ```text
//! attributes ─► supports detection? ─► enable(placeholder, FORMAT_DETECTION)
//!     ─► start ─► wait (20 ms polls) for a format change or a live frame
//!     ─► stop ─► re-enumerate ─► index of the detected mode
//! ```
//!
//! The probe opens its own handles and releases all of them before
//! returning, on success and on every error path.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bmd_core::{CaptureError, CaptureParams, DisplayModeId, DisplayModeInfo, StopSignal};
use tracing::{debug, info, warn};

use crate::device::{apply_connections, DeviceHandle};
use crate::sdk::{
    AudioInputPacket, DeckLinkApi, DetectedFormatFlags, DisplayMode, FormatChangedEvents,
    FrameFlags, Input, InputCallback, VideoInputFlags, VideoInputFrame,
};

/// How often the waiting thread re-checks the probe state.
pub const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default bound on how long the probe waits for a signal.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Outcome ───────────────────────────────────────────────────────────────────

/// How the probe concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The hardware reported a format change to this mode.
    FormatChanged,
    /// A frame with a signal arrived while the placeholder mode was enabled.
    SignalPresent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Index of the detected mode in the input's display-mode list.
    pub index:       usize,
    pub mode:        DisplayModeInfo,
    pub detected_by: Detection,
}

// ── Probe delegate ────────────────────────────────────────────────────────────

enum Wait {
    Concluded(Detection, Option<DisplayModeId>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
struct ProbeState {
    detected: Option<DisplayModeId>,
    done:     Option<Detection>,
}

struct ProbeDelegate {
    state: Mutex<ProbeState>,
    cond:  Condvar,
}

impl ProbeDelegate {
    fn new() -> Self {
        Self { state: Mutex::new(ProbeState::default()), cond: Condvar::new() }
    }

    fn finish(&self, update: impl FnOnce(&mut ProbeState)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut state);
        self.cond.notify_all();
    }

    /// Wait for a conclusion, re-checking the deadline and `cancel` every
    /// [`PROBE_POLL_INTERVAL`].
    fn wait(&self, timeout: Option<Duration>, cancel: Option<&StopSignal>) -> Wait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(how) = state.done {
                return Wait::Concluded(how, state.detected);
            }
            if cancel.is_some_and(StopSignal::is_triggered) {
                return Wait::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Wait::TimedOut;
            }
            state = self
                .cond
                .wait_timeout(state, PROBE_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl InputCallback for ProbeDelegate {
    fn video_input_format_changed(
        &self,
        _events: FormatChangedEvents,
        mode: &dyn DisplayMode,
        _flags: DetectedFormatFlags,
    ) {
        let id = mode.id();
        debug!("Probe: format change to {}", id);
        self.finish(|s| {
            s.detected = Some(id);
            s.done.get_or_insert(Detection::FormatChanged);
        });
    }

    fn video_input_frame_arrived(
        &self,
        video: Option<&dyn VideoInputFrame>,
        _audio: Option<&dyn AudioInputPacket>,
    ) {
        let Some(frame) = video else { return };
        if frame.flags().contains(FrameFlags::NO_INPUT_SOURCE) {
            return;
        }
        self.finish(|s| {
            s.done.get_or_insert(Detection::SignalPresent);
        });
    }
}

// ── Teardown guard ────────────────────────────────────────────────────────────

/// Undoes the probe's input setup in reverse order when dropped.
struct ProbeGuard {
    input:     Arc<dyn Input>,
    enabled:   bool,
    streaming: bool,
}

impl ProbeGuard {
    fn stop(&mut self) {
        if self.streaming {
            if let Err(e) = self.input.stop_streams() {
                warn!("Probe: StopStreams failed: {}", e);
            }
            self.streaming = false;
        }
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.stop();
        if self.enabled {
            if let Err(e) = self.input.disable_video_input() {
                warn!("Probe: DisableVideoInput failed: {}", e);
            }
        }
        if let Err(e) = self.input.set_callback(None) {
            warn!("Probe: clearing input callback failed: {}", e);
        }
    }
}

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Find out which display mode the device's input is receiving.
///
/// `timeout = None` waits indefinitely. Triggering `cancel` ends the wait
/// with [`CaptureError::ProbeCancelled`].
pub fn probe_display_mode(
    api: &dyn DeckLinkApi,
    params: &CaptureParams,
    timeout: Option<Duration>,
    cancel: Option<&StopSignal>,
) -> Result<ProbeOutcome, CaptureError> {
    let device = DeviceHandle::open(api, params.instance)?;

    let attributes = device
        .device()
        .attributes()
        .ok_or(CaptureError::InterfaceUnsupported("attributes"))?;
    let supported = attributes
        .supports_input_format_detection()
        .map_err(CaptureError::hardware("query format detection support"))?;
    if !supported {
        return Err(CaptureError::FormatDetectionUnsupported);
    }

    let input = device.input()?;
    let configuration = device.configuration()?;
    apply_connections(&*configuration, params)?;

    let placeholder = {
        let mut modes = input
            .display_modes()
            .map_err(CaptureError::hardware("get display mode iterator"))?;
        let first = modes
            .next_mode()
            .ok_or(CaptureError::DisplayModeOutOfRange { index: 0, available: 0 })?;
        first.id()
    };

    let delegate = Arc::new(ProbeDelegate::new());
    input
        .set_callback(Some(delegate.clone() as Arc<dyn InputCallback>))
        .map_err(CaptureError::hardware("set input callback"))?;
    let mut guard = ProbeGuard { input: input.clone(), enabled: false, streaming: false };

    input
        .enable_video_input(placeholder, params.pixel_format, VideoInputFlags::FORMAT_DETECTION)
        .map_err(CaptureError::hardware("enable video input"))?;
    guard.enabled = true;
    input.start_streams().map_err(CaptureError::hardware("start streams"))?;
    guard.streaming = true;
    debug!("Probe: streaming with placeholder {}, waiting for signal", placeholder);

    let waited = Instant::now();
    let (detected_by, detected) = match delegate.wait(timeout, cancel) {
        Wait::Concluded(how, detected) => (how, detected),
        Wait::TimedOut => return Err(CaptureError::ProbeTimedOut(waited.elapsed())),
        Wait::Cancelled => {
            debug!("Probe: cancelled after {:?}", waited.elapsed());
            return Err(CaptureError::ProbeCancelled);
        }
    };
    guard.stop();

    let target = detected.unwrap_or(placeholder);
    let mut modes = input
        .display_modes()
        .map_err(CaptureError::hardware("get display mode iterator"))?;
    let mut index = 0;
    while let Some(mode) = modes.next_mode() {
        if mode.id() == target {
            let info = mode.info();
            info!(
                "Detected {} ({}x{} @ {:.2} fps) as mode #{} after {:?}",
                info.name,
                info.width,
                info.height,
                info.frame_rate.fps(),
                index,
                waited.elapsed(),
            );
            return Ok(ProbeOutcome { index, mode: info, detected_by });
        }
        index += 1;
    }
    Err(CaptureError::DetectedModeNotFound(target))
}
