//! Negotiation, streaming, and release against the simulated card.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bmd_capture::sdk::VideoInputFlags;
use bmd_capture::sim::{SimApi, SimCall, SimDeviceSpec, SimFaults, SimMode};
use bmd_capture::{DeviceSession, SessionOptions};
use bmd_core::{
    AudioConnection, CaptureConfig, CaptureError, FieldDominance, FieldMode, HwError,
    PixelFormat, Rational, ResolvedGeometry, StopReason, StopSignal, VideoConnection,
};
use common::RecordingSink;

fn fast_recorder() -> SimDeviceSpec {
    SimDeviceSpec::mini_recorder().with_frame_interval(Duration::from_millis(2))
}

fn options() -> SessionOptions {
    SessionOptions { probe_timeout: Some(Duration::from_secs(5)), stop: None }
}

#[test]
fn explicit_mode_negotiates_and_streams() {
    let api = SimApi::single(fast_recorder());
    let sink = Arc::new(RecordingSink::default());
    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };

    let mut session = DeviceSession::open(&api, &mut config, sink.clone(), options()).unwrap();
    let expected = ResolvedGeometry {
        width:      1920,
        height:     1080,
        field_mode: FieldMode::Progressive,
        timebase:   Rational::new(1, 25),
    };
    assert_eq!(session.geometry(), expected);
    assert_eq!(config.geometry, Some(expected));
    assert_eq!(expected.field_mode.as_index(), 3);

    session.start().unwrap();
    assert!(sink.wait_for_video(10, Duration::from_secs(5)));
    session.stop().unwrap();

    let frames = sink.video.lock().unwrap().clone();
    assert!(frames.len() >= 10);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
    let first = &frames[0];
    assert_eq!(first.duration, 1);
    assert_eq!((first.width, first.height), (1920, 1080));
    assert_eq!(first.stride, 3840);
    assert_eq!(first.len, 3840 * 1080);

    let audio = sink.audio.lock().unwrap().clone();
    assert!(!audio.is_empty());
    // 2 channels of 16-bit samples, 1920 per 25 fps frame
    assert_eq!(audio[0], (0, 1920, 1920 * 2 * 2));
}

#[test]
fn auto_detect_probes_then_uses_detected_mode() {
    let api = SimApi::single(fast_recorder());
    let sink = Arc::new(RecordingSink::default());
    let mut config = CaptureConfig { video_mode: -1, ..Default::default() };

    let session = DeviceSession::open(&api, &mut config, sink, options()).unwrap();
    assert_eq!(config.video_mode, 2);
    assert_eq!(session.display_mode().name, "1080p25");

    let calls = api.calls(0);
    let probe_enable = SimCall::EnableVideo {
        mode:   SimMode::ntsc().id,
        format: PixelFormat::Yuv8,
        flags:  VideoInputFlags::FORMAT_DETECTION,
    };
    let session_enable = SimCall::EnableVideo {
        mode:   SimMode::hd1080p25().id,
        format: PixelFormat::Yuv8,
        flags:  VideoInputFlags::NONE,
    };
    let probe_at = calls.iter().position(|c| *c == probe_enable).unwrap();
    let stop_at = calls.iter().position(|c| *c == SimCall::StopStreams).unwrap();
    let session_at = calls.iter().position(|c| *c == session_enable).unwrap();
    assert!(probe_at < stop_at && stop_at < session_at);
}

#[test]
fn auto_detect_without_support_fails() {
    let api = SimApi::single(fast_recorder().with_format_detection(false));
    let mut config = CaptureConfig::default();
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::FormatDetectionUnsupported));
    assert!(err.is_format_detection());
    assert!(api.live_handles().is_zero());
    assert!(!api.calls(0).iter().any(|c| matches!(c, SimCall::EnableVideo { .. })));
}

#[test]
fn probe_without_signal_times_out_and_releases() {
    let api = SimApi::single(fast_recorder().with_signal(None));
    let mut config = CaptureConfig::default();
    let opts = SessionOptions { probe_timeout: Some(Duration::from_millis(100)), stop: None };
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), opts)
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::ProbeTimedOut(_)));
    assert!(api.live_handles().is_zero());
    assert!(!api.is_streaming(0));
    assert!(!api.has_callback(0));
}

#[test]
fn stop_request_cancels_format_detection() {
    let api = SimApi::single(fast_recorder().with_signal(None));
    let mut config = CaptureConfig::default();
    let stop = StopSignal::new();
    let opts = SessionOptions {
        probe_timeout: Some(Duration::from_secs(30)),
        stop:          Some(stop.clone()),
    };

    let trigger = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.trigger(StopReason::Interrupted);
        })
    };
    let started = Instant::now();
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), opts)
        .err()
        .unwrap();
    trigger.join().unwrap();

    assert!(matches!(err, CaptureError::ProbeCancelled));
    assert!(err.is_format_detection());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(api.live_handles().is_zero());
    assert!(!api.is_streaming(0));
    assert!(!api.has_callback(0));

    let calls = api.calls(0);
    assert_eq!(
        calls[calls.len() - 3..],
        [SimCall::StopStreams, SimCall::DisableVideo, SimCall::SetCallback { installed: false }]
    );
    assert!(!calls.iter().any(|c| matches!(c, SimCall::EnableAudio { .. })));
}

#[test]
fn already_stopped_run_skips_waiting_for_a_signal() {
    let api = SimApi::single(fast_recorder().with_signal(None));
    let stop = StopSignal::new();
    stop.trigger(StopReason::Interrupted);
    let opts = SessionOptions { probe_timeout: None, stop: Some(stop) };

    let mut config = CaptureConfig::default();
    let started = Instant::now();
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), opts)
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::ProbeCancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(api.live_handles().is_zero());
}

#[test]
fn unknown_field_dominance_fails_before_enabling_input() {
    let mut spec = fast_recorder();
    spec.input_modes[2].field_dominance = FieldDominance(0x1234_5678);
    let api = SimApi::single(spec);
    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };

    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        CaptureError::UnknownFieldDominance(d) if d == FieldDominance(0x1234_5678)
    ));
    assert!(api.live_handles().is_zero());
    assert_eq!(config.geometry, None);
    let calls = api.calls(0);
    assert!(!calls.iter().any(|c| matches!(c, SimCall::EnableVideo { .. })));
    assert!(!calls.iter().any(|c| matches!(c, SimCall::SetCallback { .. })));
}

#[test]
fn out_of_range_mode_leaves_no_live_handles() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig { video_mode: 7, ..Default::default() };
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::DisplayModeOutOfRange { index: 7, available: 3 }));
    assert!(api.live_handles().is_zero());
    assert!(!api.has_callback(0));
}

#[test]
fn illegal_channel_count_fails_before_any_hardware_call() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig { video_mode: 2, audio_channels: 4, ..Default::default() };
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::InvalidAudioChannels(4)));
    assert!(api.calls(0).is_empty());
}

#[test]
fn missing_device_is_reported_with_count() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig { video_mode: 0, instance: 3, ..Default::default() };
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::DeviceNotFound { instance: 3, available: 1 }));
    assert!(api.live_handles().is_zero());

    let api = SimApi::without_driver();
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::IteratorUnavailable(HwError::Unsupported)));
}

#[test]
fn enable_failure_undoes_callback() {
    let faults = SimFaults { enable_audio: Some(HwError::Busy), ..Default::default() };
    let api = SimApi::single(fast_recorder().with_faults(faults));
    let mut config = CaptureConfig { video_mode: 1, ..Default::default() };
    let err = DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::Hardware { source: HwError::Busy, .. }));
    assert!(!api.has_callback(0));
    assert!(api.live_handles().is_zero());
    assert!(api.calls(0).contains(&SimCall::DisableVideo));
    assert_eq!(config.geometry, None);
}

#[test]
fn connectors_are_routed_unless_unchanged() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig {
        video_mode: 0,
        video_connection: 4,
        audio_connection: 0,
        ..Default::default()
    };
    let _session =
        DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
            .unwrap();
    let calls = api.calls(0);
    assert!(calls.contains(&SimCall::SetVideoConnection(VideoConnection::Sdi)));
    assert!(!calls.iter().any(|c| matches!(c, SimCall::SetAudioConnection(AudioConnection::Unchanged))));
    assert!(!calls.iter().any(|c| matches!(c, SimCall::SetAudioConnection(_))));
}

#[test]
fn ntsc_geometry_and_audio_settings() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig {
        video_mode: 0,
        pixel_format: 1,
        audio_channels: 8,
        audio_sample_depth: 32,
        ..Default::default()
    };
    let session =
        DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
            .unwrap();
    let geometry = session.geometry();
    assert_eq!((geometry.width, geometry.height), (720, 486));
    assert_eq!(geometry.field_mode, FieldMode::LowerFieldFirst);
    assert_eq!(geometry.timebase, Rational::new(1001, 30000));
    assert!(api.calls(0).contains(&SimCall::EnableAudio {
        sample_rate:  48_000,
        sample_depth: 32,
        channels:     8,
    }));
}

#[test]
fn start_twice_fails_and_stop_is_idempotent() {
    let api = SimApi::single(fast_recorder());
    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };
    let mut session =
        DeviceSession::open(&api, &mut config, Arc::new(RecordingSink::default()), options())
            .unwrap();
    session.start().unwrap();
    assert!(matches!(session.start(), Err(CaptureError::AlreadyStreaming)));
    session.stop().unwrap();
    session.stop().unwrap();
    assert!(!session.is_streaming());
    assert_eq!(api.calls(0).iter().filter(|c| **c == SimCall::StopStreams).count(), 1);
}

#[test]
fn dropping_a_streaming_session_releases_everything() {
    let api = SimApi::single(fast_recorder());
    let sink = Arc::new(RecordingSink::default());
    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };
    let mut session = DeviceSession::open(&api, &mut config, sink.clone(), options()).unwrap();
    session.start().unwrap();
    assert!(sink.wait_for_video(3, Duration::from_secs(5)));
    drop(session);

    assert!(!api.is_streaming(0));
    assert!(!api.has_callback(0));
    assert!(api.live_handles().is_zero());
    // only the test's reference is left; the delegate released its clone
    assert_eq!(Arc::strong_count(&sink), 1);

    let calls = api.calls(0);
    let tail: Vec<_> = calls.iter().rev().take(4).rev().cloned().collect();
    assert_eq!(
        tail,
        vec![
            SimCall::StopStreams,
            SimCall::DisableAudio,
            SimCall::DisableVideo,
            SimCall::SetCallback { installed: false },
        ]
    );
}

#[test]
fn signal_loss_frames_are_not_delivered() {
    let api = SimApi::single(fast_recorder().with_no_signal_frames(5));
    let sink = Arc::new(RecordingSink::default());
    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };
    let mut session = DeviceSession::open(&api, &mut config, sink.clone(), options()).unwrap();
    session.start().unwrap();
    assert!(sink.wait_for_video(3, Duration::from_secs(5)));
    session.stop().unwrap();

    let first = sink.video.lock().unwrap()[0].clone();
    assert_eq!(first.first, 5);
    assert_eq!(first.timestamp, 5);
    assert!(session.delegate_stats().no_signal >= 5);
}
