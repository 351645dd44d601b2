//! `DeviceSession`: one negotiated capture on one DeckLink input.
//!
//! Negotiation runs in [`DeviceSession::open`]:
//!
//! ```text
//! validate ─► (probe if auto) ─► device #N ─► input + configuration
//!     ─► connectors ─► display mode ─► geometry ─► delegate
//!     ─► enable video ─► enable audio (48 kHz)
//! ```
//!
//! Any failure returns the error and releases whatever was acquired so far.
//! A session that opened successfully is released by dropping it: streams
//! are stopped, the callback removed, and handles released in reverse
//! acquisition order.

use std::sync::Arc;
use std::time::Duration;

use bmd_core::{
    CaptureConfig, CaptureError, CaptureParams, DisplayModeInfo, FieldMode, FrameSink,
    ModeSelection, ResolvedGeometry, StopSignal, AUDIO_SAMPLE_RATE,
};
use tracing::{debug, info, warn};

use crate::delegate::{CaptureDelegate, DelegateStats};
use crate::device::{apply_connections, select_mode, DeviceHandle};
use crate::probe::{probe_display_mode, DEFAULT_PROBE_TIMEOUT};
use crate::sdk::{
    Configuration, DeckLinkApi, DisplayMode, DisplayModeIterator, Input, InputCallback,
    VideoInputFlags,
};

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on the format probe; `None` waits for a signal indefinitely.
    pub probe_timeout: Option<Duration>,
    /// Aborts a running format probe when triggered.
    pub stop:          Option<StopSignal>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { probe_timeout: Some(DEFAULT_PROBE_TIMEOUT), stop: None }
    }
}

// ── DeviceSession ─────────────────────────────────────────────────────────────

pub struct DeviceSession {
    // Handles are declared in reverse acquisition order so that the default
    // field drop order releases them last-acquired first.
    delegate:       Arc<CaptureDelegate>,
    mode:           Box<dyn DisplayMode>,
    _modes:         Box<dyn DisplayModeIterator>,
    _configuration: Arc<dyn Configuration>,
    input:          Arc<dyn Input>,
    device:         DeviceHandle,

    params:         CaptureParams,
    geometry:       ResolvedGeometry,
    video_enabled:  bool,
    audio_enabled:  bool,
    streaming:      bool,
}

impl DeviceSession {
    /// Negotiate a capture according to `config`.
    ///
    /// On success `config.geometry` holds the resolved geometry, and an
    /// auto-detected `video_mode` is replaced by the detected index.
    pub fn open(
        api: &dyn DeckLinkApi,
        config: &mut CaptureConfig,
        sink: Arc<dyn FrameSink>,
        options: SessionOptions,
    ) -> Result<Self, CaptureError> {
        let mut params = config.validate()?;

        let index = match params.mode {
            ModeSelection::Index(index) => index,
            ModeSelection::AutoDetect => {
                let outcome = probe_display_mode(
                    api,
                    &params,
                    options.probe_timeout,
                    options.stop.as_ref(),
                )?;
                config.video_mode = outcome.index as i32;
                params.mode = ModeSelection::Index(outcome.index);
                outcome.index
            }
        };

        let device = DeviceHandle::open(api, params.instance)?;
        let input = device.input()?;
        let configuration = device.configuration()?;
        apply_connections(&*configuration, &params)?;

        let (modes, mode) = select_mode(&*input, index)?;
        let field_mode = FieldMode::from_dominance(mode.field_dominance())
            .ok_or(CaptureError::UnknownFieldDominance(mode.field_dominance()))?;
        let geometry = ResolvedGeometry {
            width:    mode.width(),
            height:   mode.height(),
            field_mode,
            timebase: mode.frame_rate(),
        };

        let delegate = Arc::new(CaptureDelegate::new(sink, geometry.timebase.den));
        input
            .set_callback(Some(delegate.clone() as Arc<dyn InputCallback>))
            .map_err(CaptureError::hardware("set input callback"))?;

        // From here on, Drop undoes the callback and any enabled input.
        let mut session = Self {
            delegate,
            mode,
            _modes: modes,
            _configuration: configuration,
            input,
            device,
            params,
            geometry,
            video_enabled: false,
            audio_enabled: false,
            streaming: false,
        };
        session.enable_inputs()?;

        config.apply_geometry(geometry);
        info!(
            "DeckLink #{} ({}): mode #{} {} {}x{} {} fps, field mode {}, {}, audio {}ch/{}bit",
            session.device.instance(),
            session.device.device().model_name(),
            index,
            session.mode.name().unwrap_or_default(),
            geometry.width,
            geometry.height,
            geometry.timebase.fps(),
            field_mode.as_index(),
            params.pixel_format,
            params.audio_channels,
            params.audio_sample_depth,
        );
        Ok(session)
    }

    fn enable_inputs(&mut self) -> Result<(), CaptureError> {
        self.input
            .enable_video_input(self.mode.id(), self.params.pixel_format, VideoInputFlags::NONE)
            .map_err(CaptureError::hardware("enable video input"))?;
        self.video_enabled = true;
        self.input
            .enable_audio_input(
                AUDIO_SAMPLE_RATE,
                self.params.audio_sample_depth,
                self.params.audio_channels,
            )
            .map_err(CaptureError::hardware("enable audio input"))?;
        self.audio_enabled = true;
        Ok(())
    }

    /// Begin delivering frames to the sink.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.streaming {
            return Err(CaptureError::AlreadyStreaming);
        }
        self.input.start_streams().map_err(CaptureError::hardware("start streams"))?;
        self.streaming = true;
        debug!("DeckLink #{} streaming", self.device.instance());
        Ok(())
    }

    /// Stop delivering frames. Stopping a stopped session is a no-op.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.streaming {
            return Ok(());
        }
        self.input.stop_streams().map_err(CaptureError::hardware("stop streams"))?;
        self.streaming = false;
        debug!("DeckLink #{} stopped", self.device.instance());
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn geometry(&self) -> ResolvedGeometry {
        self.geometry
    }

    pub fn params(&self) -> &CaptureParams {
        &self.params
    }

    pub fn display_mode(&self) -> DisplayModeInfo {
        self.mode.info()
    }

    pub fn model_name(&self) -> String {
        self.device.device().model_name()
    }

    pub fn delegate_stats(&self) -> DelegateStats {
        self.delegate.stats()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Releasing session: {}", e);
        }
        if self.audio_enabled {
            if let Err(e) = self.input.disable_audio_input() {
                warn!("Releasing session: disable audio input failed: {}", e);
            }
        }
        if self.video_enabled {
            if let Err(e) = self.input.disable_video_input() {
                warn!("Releasing session: disable video input failed: {}", e);
            }
        }
        if let Err(e) = self.input.set_callback(None) {
            warn!("Releasing session: clearing input callback failed: {}", e);
        }
        debug!("DeckLink #{} session released", self.device.instance());
    }
}
