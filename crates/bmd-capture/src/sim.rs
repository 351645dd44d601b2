//! Simulated DeckLink backend.
//!
//! Implements the [`sdk`](crate::sdk) traits in-process so negotiation,
//! probing, and the capture path can run without a card:
//!
//! ```text
//! SimApi ─► SimDeviceIterator ─► SimDevice ─► SimHardware (Input, Configuration, Attributes)
//!                                                 │ start_streams
//!                                                 ▼
//!                                  "sim-decklink-N" thread ─► InputCallback
//! ```
//!
//! Every handle the SDK would reference-count carries a [`LiveHandles`]
//! guard, and every state-changing call is appended to a call log, so tests
//! can check that a session released everything and in what order it
//! drove the hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bmd_core::{
    AudioConnection, DisplayModeId, FieldDominance, HwError, PixelFormat, Rational,
    VideoConnection, AUDIO_SAMPLE_RATE,
};
use tracing::{debug, warn};

use crate::sdk::{
    Attributes, AudioInputPacket, Configuration, DeckLinkApi, DetectedFormatFlags, Device,
    DeviceIterator, DisplayMode, DisplayModeIterator, FormatChangedEvents, FrameFlags, Input,
    InputCallback, Output, VideoInputFlags, VideoInputFrame,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Fixture description ───────────────────────────────────────────────────────

/// A display mode as the simulated card reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimMode {
    pub id:              DisplayModeId,
    pub name:            Option<String>,
    pub width:           u32,
    pub height:          u32,
    pub frame_rate:      Rational,
    pub field_dominance: FieldDominance,
}

impl SimMode {
    pub fn new(
        code: &[u8; 4],
        name: &str,
        width: u32,
        height: u32,
        frame_rate: Rational,
        field_dominance: FieldDominance,
    ) -> Self {
        Self {
            id: DisplayModeId::from_fourcc(code),
            name: Some(name.to_owned()),
            width,
            height,
            frame_rate,
            field_dominance,
        }
    }

    pub fn ntsc() -> Self {
        Self::new(b"ntsc", "NTSC", 720, 486, Rational::new(1001, 30000), FieldDominance::LOWER_FIELD_FIRST)
    }

    pub fn pal() -> Self {
        Self::new(b"pal ", "PAL", 720, 576, Rational::new(1, 25), FieldDominance::UPPER_FIELD_FIRST)
    }

    pub fn hd720p50() -> Self {
        Self::new(b"hp50", "720p50", 1280, 720, Rational::new(1, 50), FieldDominance::PROGRESSIVE)
    }

    pub fn hd1080i50() -> Self {
        Self::new(b"Hi50", "1080i50", 1920, 1080, Rational::new(1, 25), FieldDominance::UPPER_FIELD_FIRST)
    }

    pub fn hd1080p25() -> Self {
        Self::new(b"Hp25", "1080p25", 1920, 1080, Rational::new(1, 25), FieldDominance::PROGRESSIVE)
    }

    fn frame_duration(&self) -> Duration {
        let Rational { num, den } = self.frame_rate;
        if num <= 0 || den <= 0 {
            return Duration::from_millis(40);
        }
        Duration::from_nanos((num as u64).saturating_mul(1_000_000_000) / den as u64)
    }
}

/// Calls that fail with the given status instead of succeeding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFaults {
    pub enable_video:  Option<HwError>,
    pub enable_audio:  Option<HwError>,
    pub start_streams: Option<HwError>,
}

/// What one simulated card looks like and what its input is receiving.
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    pub model_name:        String,
    pub input_modes:       Vec<SimMode>,
    pub output_modes:      Vec<SimMode>,
    pub has_input:         bool,
    pub has_output:        bool,
    pub has_configuration: bool,
    pub has_attributes:    bool,
    pub format_detection:  bool,
    /// Mode of the signal on the input; `None` = nothing connected.
    pub signal:            Option<DisplayModeId>,
    /// Frames flagged "no input source" before the signal locks.
    pub no_signal_frames:  u64,
    /// Wall-clock pacing; `None` paces at the mode's frame rate.
    pub frame_interval:    Option<Duration>,
    pub faults:            SimFaults,
}

impl SimDeviceSpec {
    /// Capture-only card with NTSC, PAL and 1080p25; a 1080p25 signal is
    /// connected.
    pub fn mini_recorder() -> Self {
        let hd = SimMode::hd1080p25();
        Self {
            model_name:        "DeckLink Mini Recorder (simulated)".to_owned(),
            signal:            Some(hd.id),
            input_modes:       vec![SimMode::ntsc(), SimMode::pal(), hd],
            output_modes:      Vec::new(),
            has_input:         true,
            has_output:        false,
            has_configuration: true,
            has_attributes:    true,
            format_detection:  true,
            no_signal_frames:  0,
            frame_interval:    None,
            faults:            SimFaults::default(),
        }
    }

    /// Card with input and output and a wider mode list.
    pub fn studio() -> Self {
        let modes = vec![
            SimMode::ntsc(),
            SimMode::pal(),
            SimMode::hd720p50(),
            SimMode::hd1080i50(),
            SimMode::hd1080p25(),
        ];
        Self {
            model_name: "DeckLink Studio (simulated)".to_owned(),
            signal: Some(SimMode::pal().id),
            output_modes: modes.clone(),
            input_modes: modes,
            has_output: true,
            ..Self::mini_recorder()
        }
    }

    pub fn with_signal(mut self, signal: Option<DisplayModeId>) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_format_detection(mut self, supported: bool) -> Self {
        self.format_detection = supported;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn with_no_signal_frames(mut self, frames: u64) -> Self {
        self.no_signal_frames = frames;
        self
    }

    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    fn input_mode(&self, id: DisplayModeId) -> Option<&SimMode> {
        self.input_modes.iter().find(|m| m.id == id)
    }
}

// ── Call log ──────────────────────────────────────────────────────────────────

/// One state-changing call received by a simulated card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    SetVideoConnection(VideoConnection),
    SetAudioConnection(AudioConnection),
    SetCallback { installed: bool },
    EnableVideo { mode: DisplayModeId, format: PixelFormat, flags: VideoInputFlags },
    DisableVideo,
    EnableAudio { sample_rate: u32, sample_depth: u32, channels: u32 },
    DisableAudio,
    StartStreams,
    StopStreams,
}

// ── Live handle accounting ────────────────────────────────────────────────────

/// Count of SDK handles currently alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveHandles {
    pub device_iterators: usize,
    pub devices:          usize,
    pub mode_iterators:   usize,
    pub modes:            usize,
}

impl LiveHandles {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Default)]
struct LiveCounters {
    device_iterators: AtomicUsize,
    devices:          AtomicUsize,
    mode_iterators:   AtomicUsize,
    modes:            AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
    DeviceIterator,
    Device,
    ModeIterator,
    Mode,
}

impl LiveCounters {
    fn counter(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::DeviceIterator => &self.device_iterators,
            HandleKind::Device => &self.devices,
            HandleKind::ModeIterator => &self.mode_iterators,
            HandleKind::Mode => &self.modes,
        }
    }

    fn snapshot(&self) -> LiveHandles {
        LiveHandles {
            device_iterators: self.device_iterators.load(Ordering::SeqCst),
            devices:          self.devices.load(Ordering::SeqCst),
            mode_iterators:   self.mode_iterators.load(Ordering::SeqCst),
            modes:            self.modes.load(Ordering::SeqCst),
        }
    }
}

struct LiveGuard {
    counters: Arc<LiveCounters>,
    kind:     HandleKind,
}

impl LiveGuard {
    fn new(counters: &Arc<LiveCounters>, kind: HandleKind) -> Self {
        counters.counter(kind).fetch_add(1, Ordering::SeqCst);
        Self { counters: counters.clone(), kind }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.counters.counter(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}

// ── SimApi ────────────────────────────────────────────────────────────────────

pub struct SimApi {
    cards:          Vec<Arc<SimHardware>>,
    live:           Arc<LiveCounters>,
    iterator_error: Option<HwError>,
}

impl SimApi {
    pub fn new(specs: Vec<SimDeviceSpec>) -> Self {
        let live = Arc::new(LiveCounters::default());
        let cards = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Arc::new(SimHardware::new(index, spec, live.clone())))
            .collect();
        Self { cards, live, iterator_error: None }
    }

    pub fn single(spec: SimDeviceSpec) -> Self {
        Self::new(vec![spec])
    }

    /// A host with no driver installed: creating an iterator fails.
    pub fn without_driver() -> Self {
        Self { iterator_error: Some(HwError::Unsupported), ..Self::new(Vec::new()) }
    }

    pub fn live_handles(&self) -> LiveHandles {
        self.live.snapshot()
    }

    /// Calls received so far by card `index`.
    pub fn calls(&self, index: usize) -> Vec<SimCall> {
        self.cards.get(index).map(|c| lock(&c.calls).clone()).unwrap_or_default()
    }

    pub fn is_streaming(&self, index: usize) -> bool {
        self.cards.get(index).is_some_and(|c| lock(&c.worker).is_some())
    }

    pub fn has_callback(&self, index: usize) -> bool {
        self.cards.get(index).is_some_and(|c| lock(&c.state).callback.is_some())
    }
}

impl DeckLinkApi for SimApi {
    fn iterator(&self) -> Result<Box<dyn DeviceIterator>, HwError> {
        if let Some(e) = self.iterator_error {
            return Err(e);
        }
        Ok(Box::new(SimDeviceIterator {
            cards:  self.cards.clone(),
            next:   0,
            live:   self.live.clone(),
            _guard: LiveGuard::new(&self.live, HandleKind::DeviceIterator),
        }))
    }
}

struct SimDeviceIterator {
    cards:  Vec<Arc<SimHardware>>,
    next:   usize,
    live:   Arc<LiveCounters>,
    _guard: LiveGuard,
}

impl DeviceIterator for SimDeviceIterator {
    fn next_device(&mut self) -> Option<Arc<dyn Device>> {
        let card = self.cards.get(self.next)?.clone();
        self.next += 1;
        Some(Arc::new(SimDevice { card, _guard: LiveGuard::new(&self.live, HandleKind::Device) }))
    }
}

struct SimDevice {
    card:   Arc<SimHardware>,
    _guard: LiveGuard,
}

impl Device for SimDevice {
    fn model_name(&self) -> String {
        self.card.spec.model_name.clone()
    }

    fn input(&self) -> Option<Arc<dyn Input>> {
        self.card.spec.has_input.then(|| self.card.clone() as Arc<dyn Input>)
    }

    fn output(&self) -> Option<Arc<dyn Output>> {
        self.card
            .spec
            .has_output
            .then(|| Arc::new(SimOutput { card: self.card.clone() }) as Arc<dyn Output>)
    }

    fn configuration(&self) -> Option<Arc<dyn Configuration>> {
        self.card.spec.has_configuration.then(|| self.card.clone() as Arc<dyn Configuration>)
    }

    fn attributes(&self) -> Option<Arc<dyn Attributes>> {
        self.card.spec.has_attributes.then(|| self.card.clone() as Arc<dyn Attributes>)
    }
}

// ── Display modes ─────────────────────────────────────────────────────────────

struct SimModeIterator {
    modes:  std::vec::IntoIter<SimMode>,
    live:   Arc<LiveCounters>,
    _guard: LiveGuard,
}

impl SimModeIterator {
    fn new(modes: Vec<SimMode>, live: &Arc<LiveCounters>) -> Self {
        Self {
            modes:  modes.into_iter(),
            live:   live.clone(),
            _guard: LiveGuard::new(live, HandleKind::ModeIterator),
        }
    }
}

impl DisplayModeIterator for SimModeIterator {
    fn next_mode(&mut self) -> Option<Box<dyn DisplayMode>> {
        let mode = self.modes.next()?;
        Some(Box::new(SimDisplayMode::new(mode, &self.live)))
    }
}

struct SimDisplayMode {
    mode:   SimMode,
    _guard: LiveGuard,
}

impl SimDisplayMode {
    fn new(mode: SimMode, live: &Arc<LiveCounters>) -> Self {
        Self { mode, _guard: LiveGuard::new(live, HandleKind::Mode) }
    }
}

impl DisplayMode for SimDisplayMode {
    fn id(&self) -> DisplayModeId {
        self.mode.id
    }

    fn name(&self) -> Option<String> {
        self.mode.name.clone()
    }

    fn width(&self) -> u32 {
        self.mode.width
    }

    fn height(&self) -> u32 {
        self.mode.height
    }

    fn frame_rate(&self) -> Rational {
        self.mode.frame_rate
    }

    fn field_dominance(&self) -> FieldDominance {
        self.mode.field_dominance
    }

    fn flags(&self) -> u32 {
        0
    }
}

struct SimOutput {
    card: Arc<SimHardware>,
}

impl Output for SimOutput {
    fn display_modes(&self) -> Result<Box<dyn DisplayModeIterator>, HwError> {
        Ok(Box::new(SimModeIterator::new(self.card.spec.output_modes.clone(), &self.card.live)))
    }
}

// ── SimHardware ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct InputState {
    callback: Option<Arc<dyn InputCallback>>,
    video:    Option<(DisplayModeId, PixelFormat, VideoInputFlags)>,
    /// `(sample_depth, channels)`; the rate is always 48 kHz.
    audio:    Option<(u32, u32)>,
}

struct Worker {
    stop:   Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Shared state of one simulated card, behind all of its interfaces.
struct SimHardware {
    index:  usize,
    spec:   SimDeviceSpec,
    live:   Arc<LiveCounters>,
    calls:  Mutex<Vec<SimCall>>,
    state:  Arc<Mutex<InputState>>,
    worker: Mutex<Option<Worker>>,
}

impl SimHardware {
    fn new(index: usize, spec: SimDeviceSpec, live: Arc<LiveCounters>) -> Self {
        Self {
            index,
            spec,
            live,
            calls: Mutex::new(Vec::new()),
            state: Arc::new(Mutex::new(InputState::default())),
            worker: Mutex::new(None),
        }
    }

    fn record(&self, call: SimCall) {
        lock(&self.calls).push(call);
    }

    fn halt(&self) -> Result<(), HwError> {
        let Some(worker) = lock(&self.worker).take() else {
            return Ok(());
        };
        worker.stop.store(true, Ordering::Release);
        worker.handle.join().map_err(|_| HwError::Failed(-1))
    }
}

impl Input for SimHardware {
    fn display_modes(&self) -> Result<Box<dyn DisplayModeIterator>, HwError> {
        Ok(Box::new(SimModeIterator::new(self.spec.input_modes.clone(), &self.live)))
    }

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> Result<(), HwError> {
        self.record(SimCall::SetCallback { installed: callback.is_some() });
        lock(&self.state).callback = callback;
        Ok(())
    }

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        format: PixelFormat,
        flags: VideoInputFlags,
    ) -> Result<(), HwError> {
        self.record(SimCall::EnableVideo { mode, format, flags });
        if let Some(e) = self.spec.faults.enable_video {
            return Err(e);
        }
        if self.spec.input_mode(mode).is_none() {
            return Err(HwError::InvalidArgument);
        }
        if flags.contains(VideoInputFlags::FORMAT_DETECTION) && !self.spec.format_detection {
            return Err(HwError::Unsupported);
        }
        lock(&self.state).video = Some((mode, format, flags));
        Ok(())
    }

    fn disable_video_input(&self) -> Result<(), HwError> {
        self.record(SimCall::DisableVideo);
        lock(&self.state).video = None;
        Ok(())
    }

    fn enable_audio_input(
        &self,
        sample_rate: u32,
        sample_depth: u32,
        channels: u32,
    ) -> Result<(), HwError> {
        self.record(SimCall::EnableAudio { sample_rate, sample_depth, channels });
        if let Some(e) = self.spec.faults.enable_audio {
            return Err(e);
        }
        let legal = sample_rate == AUDIO_SAMPLE_RATE
            && matches!(sample_depth, 16 | 32)
            && matches!(channels, 2 | 8 | 16);
        if !legal {
            return Err(HwError::InvalidArgument);
        }
        lock(&self.state).audio = Some((sample_depth, channels));
        Ok(())
    }

    fn disable_audio_input(&self) -> Result<(), HwError> {
        self.record(SimCall::DisableAudio);
        lock(&self.state).audio = None;
        Ok(())
    }

    fn start_streams(&self) -> Result<(), HwError> {
        self.record(SimCall::StartStreams);
        if let Some(e) = self.spec.faults.start_streams {
            return Err(e);
        }
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(HwError::Busy);
        }
        let (video, audio) = {
            let state = lock(&self.state);
            (state.video, state.audio)
        };
        let (mode_id, format, flags) = video.ok_or(HwError::InvalidArgument)?;
        let mode = self.spec.input_mode(mode_id).cloned().ok_or(HwError::InvalidArgument)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stream = Stream {
            state: self.state.clone(),
            live: self.live.clone(),
            stop: stop.clone(),
            spec: self.spec.clone(),
            mode,
            format,
            detection: flags.contains(VideoInputFlags::FORMAT_DETECTION),
            audio,
        };
        let handle = thread::Builder::new()
            .name(format!("sim-decklink-{}", self.index))
            .spawn(move || stream.run())
            .map_err(|_| HwError::Failed(-1))?;
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn stop_streams(&self) -> Result<(), HwError> {
        self.record(SimCall::StopStreams);
        self.halt()
    }
}

impl Configuration for SimHardware {
    fn set_video_input_connection(&self, connection: VideoConnection) -> Result<(), HwError> {
        self.record(SimCall::SetVideoConnection(connection));
        Ok(())
    }

    fn set_audio_input_connection(&self, connection: AudioConnection) -> Result<(), HwError> {
        self.record(SimCall::SetAudioConnection(connection));
        Ok(())
    }
}

impl Attributes for SimHardware {
    fn supports_input_format_detection(&self) -> Result<bool, HwError> {
        Ok(self.spec.format_detection)
    }
}

impl Drop for SimHardware {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            warn!("sim-decklink-{}: stream thread panicked: {}", self.index, e);
        }
    }
}

// ── Stream thread ─────────────────────────────────────────────────────────────

struct Stream {
    state:     Arc<Mutex<InputState>>,
    live:      Arc<LiveCounters>,
    stop:      Arc<AtomicBool>,
    spec:      SimDeviceSpec,
    mode:      SimMode,
    format:    PixelFormat,
    detection: bool,
    audio:     Option<(u32, u32)>,
}

impl Stream {
    fn run(self) {
        let signal = self.spec.signal.and_then(|id| self.spec.input_mode(id).cloned());
        let mut current = self.mode.clone();
        let mut announced = false;
        let mut video = Vec::new();
        let mut audio = Vec::new();
        let mut frame_no: i64 = 0;
        let mut samples_sent: i64 = 0;
        debug!("sim: streaming {} ({})", current.name.as_deref().unwrap_or("?"), self.format);

        while !self.stop.load(Ordering::Acquire) {
            let interval = self.spec.frame_interval.unwrap_or_else(|| current.frame_duration());
            let callback = lock(&self.state).callback.clone();
            let Some(callback) = callback else {
                thread::sleep(interval);
                continue;
            };

            if let Some(sig) = &signal {
                if self.detection && !announced && sig.id != current.id {
                    let detected = SimDisplayMode::new(sig.clone(), &self.live);
                    callback.video_input_format_changed(
                        FormatChangedEvents::DISPLAY_MODE_CHANGED,
                        &detected,
                        DetectedFormatFlags::YCBCR_422,
                    );
                    announced = true;
                    current = sig.clone();
                }
            }

            let locked = signal.as_ref().is_some_and(|s| s.id == current.id)
                && frame_no as u64 >= self.spec.no_signal_frames;
            let flags = if locked { FrameFlags::NONE } else { FrameFlags::NO_INPUT_SOURCE };

            let row_bytes = self.format.row_bytes(current.width);
            video.resize(row_bytes as usize * current.height as usize, 0);
            if video.len() >= 8 {
                video[..8].copy_from_slice(&frame_no.to_le_bytes());
            }
            let frame = SimFrame {
                width: current.width,
                height: current.height,
                row_bytes,
                flags,
                frame_rate: current.frame_rate,
                index: frame_no,
                data: &video,
            };

            let packet = self.audio.map(|(depth, channels)| {
                let Rational { num, den } = current.frame_rate;
                let end = (frame_no + 1) * AUDIO_SAMPLE_RATE as i64 * num / den.max(1);
                let samples = (end - samples_sent).max(0);
                audio.resize(samples as usize * channels as usize * depth as usize / 8, 0);
                let start = samples_sent;
                samples_sent = end;
                (start, samples as u32)
            });
            let packet = packet.map(|(start, samples)| SimAudio { start, samples, data: &audio });

            callback.video_input_frame_arrived(
                Some(&frame),
                packet.as_ref().map(|p| p as &dyn AudioInputPacket),
            );
            drop(callback);
            frame_no += 1;
            thread::sleep(interval);
        }
        debug!("sim: stream stopped after {} frames", frame_no);
    }
}

struct SimFrame<'a> {
    width:      u32,
    height:     u32,
    row_bytes:  u32,
    flags:      FrameFlags,
    frame_rate: Rational,
    index:      i64,
    data:       &'a [u8],
}

impl VideoInputFrame for SimFrame<'_> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn row_bytes(&self) -> u32 {
        self.row_bytes
    }

    fn flags(&self) -> FrameFlags {
        self.flags
    }

    fn bytes(&self) -> &[u8] {
        self.data
    }

    fn stream_time(&self, time_scale: i64) -> Result<(i64, i64), HwError> {
        let Rational { num, den } = self.frame_rate;
        if den <= 0 || time_scale <= 0 {
            return Err(HwError::InvalidArgument);
        }
        let duration = num as i128 * time_scale as i128 / den as i128;
        Ok(((self.index as i128 * duration) as i64, duration as i64))
    }
}

struct SimAudio<'a> {
    start:   i64,
    samples: u32,
    data:    &'a [u8],
}

impl AudioInputPacket for SimAudio<'_> {
    fn sample_frame_count(&self) -> u32 {
        self.samples
    }

    fn bytes(&self) -> &[u8] {
        self.data
    }

    fn packet_time(&self, time_scale: i64) -> Result<i64, HwError> {
        if time_scale <= 0 {
            return Err(HwError::InvalidArgument);
        }
        Ok((self.start as i128 * time_scale as i128 / AUDIO_SAMPLE_RATE as i128) as i64)
    }
}
