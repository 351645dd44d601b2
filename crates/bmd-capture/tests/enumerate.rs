use std::time::Duration;

use bmd_capture::sim::{SimApi, SimDeviceSpec, SimMode};
use bmd_capture::{enumerate_display_modes, list_devices, probe_display_mode, Detection};
use bmd_core::{CaptureConfig, CaptureError, Direction, IoDirections};

fn two_cards() -> SimApi {
    SimApi::new(vec![SimDeviceSpec::mini_recorder(), SimDeviceSpec::studio()])
}

#[test]
fn lists_devices_with_capabilities() {
    let api = two_cards();
    let devices = list_devices(&api).unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].index, 0);
    assert!(devices[0].has_input && !devices[0].has_output);
    assert!(devices[1].has_output);
    assert_eq!(devices[1].format_detection, Some(true));
    assert!(api.live_handles().is_zero());
}

#[test]
fn enumerates_input_modes_of_every_device() {
    let api = two_cards();
    let mut seen = Vec::new();
    let n = enumerate_display_modes(&api, None, IoDirections::INPUT, |dev, dir, info| {
        seen.push((dev, dir, info.name.clone()));
    })
    .unwrap();
    assert_eq!(n, 8);
    assert_eq!(seen[0], (0, Direction::Input, "NTSC".to_owned()));
    assert_eq!(seen[2], (0, Direction::Input, "1080p25".to_owned()));
    assert!(seen.iter().all(|(_, dir, _)| *dir == Direction::Input));
    assert!(api.live_handles().is_zero());
}

#[test]
fn enumerates_one_device_in_both_directions() {
    let api = two_cards();
    let mut outputs = 0;
    let n = enumerate_display_modes(&api, Some(1), IoDirections::ANY, |dev, dir, _| {
        assert_eq!(dev, 1);
        if dir == Direction::Output {
            outputs += 1;
        }
    })
    .unwrap();
    assert_eq!(n, 10);
    assert_eq!(outputs, 5);
}

#[test]
fn devices_without_output_are_skipped_for_output() {
    let api = SimApi::single(SimDeviceSpec::mini_recorder());
    let n = enumerate_display_modes(&api, None, IoDirections::OUTPUT, |_, _, _| {}).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn unnamed_modes_are_skipped() {
    let mut spec = SimDeviceSpec::mini_recorder();
    spec.input_modes[1].name = None;
    let api = SimApi::single(spec);
    let mut names = Vec::new();
    enumerate_display_modes(&api, None, IoDirections::INPUT, |_, _, info| names.push(info.name.clone()))
        .unwrap();
    assert_eq!(names, vec!["NTSC".to_owned(), "1080p25".to_owned()]);
}

#[test]
fn probe_reports_detected_index() {
    let spec = SimDeviceSpec::studio()
        .with_signal(Some(SimMode::hd1080i50().id))
        .with_frame_interval(Duration::from_millis(2));
    let api = SimApi::single(spec);
    let params = CaptureConfig::default().validate().unwrap();
    let outcome = probe_display_mode(&api, &params, Some(Duration::from_secs(5)), None).unwrap();
    assert_eq!(outcome.index, 3);
    assert_eq!(outcome.mode.name, "1080i50");
    assert_eq!(outcome.detected_by, Detection::FormatChanged);
    assert!(api.live_handles().is_zero());
    assert!(!api.is_streaming(0));
}

#[test]
fn probe_with_signal_on_placeholder_keeps_first_mode() {
    let spec = SimDeviceSpec::mini_recorder()
        .with_signal(Some(SimMode::ntsc().id))
        .with_frame_interval(Duration::from_millis(2));
    let api = SimApi::single(spec);
    let params = CaptureConfig::default().validate().unwrap();
    let outcome = probe_display_mode(&api, &params, Some(Duration::from_secs(5)), None).unwrap();
    assert_eq!(outcome.index, 0);
    assert_eq!(outcome.detected_by, Detection::SignalPresent);
}

#[test]
fn probe_without_attributes_is_unsupported_interface() {
    let mut spec = SimDeviceSpec::mini_recorder();
    spec.has_attributes = false;
    let api = SimApi::single(spec);
    let params = CaptureConfig::default().validate().unwrap();
    let err = probe_display_mode(&api, &params, Some(Duration::from_millis(50)), None)
        .unwrap_err();
    assert!(matches!(err, CaptureError::InterfaceUnsupported("attributes")));
}
