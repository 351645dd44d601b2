//! Simulated card → session → QueueSink → PacketWriter → RawMuxer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bmd_capture::sim::{SimApi, SimDeviceSpec};
use bmd_capture::{DeviceSession, SessionOptions};
use bmd_core::{CaptureConfig, StopReason, StopSignal};
use bmd_writer::{
    open_muxer, AdmissionPolicy, ContainerFormat, PacketQueue, PacketWriter, QueueSink, RawMuxer,
    StreamLayout,
};

fn output_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bmd-capture-it-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("capture.yuv")
}

#[test]
fn frame_limit_run_writes_every_frame() {
    let api = SimApi::single(
        SimDeviceSpec::mini_recorder().with_frame_interval(Duration::from_millis(2)),
    );
    let stop = StopSignal::new();
    let queue = Arc::new(PacketQueue::new(256 << 20, AdmissionPolicy::DropNewest));
    let sink = Arc::new(QueueSink::new(queue.clone(), stop.clone()).with_max_frames(Some(12)));

    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };
    let mut session =
        DeviceSession::open(&api, &mut config, sink.clone(), SessionOptions::default()).unwrap();
    let layout = StreamLayout::derive(&session.geometry(), session.params());
    assert!(sink.declare(&layout));

    let path = output_path("limit");
    let muxer = open_muxer(ContainerFormat::Raw, &path, &layout).unwrap();
    let writer = PacketWriter::spawn(queue.clone(), muxer).unwrap();

    session.start().unwrap();
    assert_eq!(stop.wait_timeout(Duration::from_secs(10)), Some(StopReason::FrameLimit));
    session.stop().unwrap();
    queue.abort();
    let (mut muxer, written) = writer.join().unwrap();
    let stats = muxer.finish().unwrap();
    drop(session);

    assert_eq!(stats.video_packets, 12);
    assert_eq!(written.video_packets, 12);
    assert_eq!(written.write_errors, 0);
    assert_eq!(queue.stats().dropped_video, 0);

    let frame_len = 1920 * 2 * 1080;
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 12 * frame_len as u64);
    let wav = std::fs::read(RawMuxer::audio_path(&path)).unwrap();
    let data_len = u32::from_le_bytes(wav[40..44].try_into().unwrap()) as usize;
    assert_eq!(wav.len(), 44 + data_len);
    assert_eq!(data_len as u64, stats.audio_bytes);
    assert!(api.live_handles().is_zero());
}

#[test]
fn tiny_memory_limit_drops_video_and_keeps_audio() {
    let api = SimApi::single(
        SimDeviceSpec::mini_recorder().with_frame_interval(Duration::from_millis(1)),
    );
    let stop = StopSignal::new();
    // room for roughly one 1080p UYVY frame
    let queue = Arc::new(PacketQueue::new(5 << 20, AdmissionPolicy::DropNewest));
    let sink = Arc::new(QueueSink::new(queue.clone(), stop.clone()));

    let mut config = CaptureConfig { video_mode: 2, ..Default::default() };
    let mut session =
        DeviceSession::open(&api, &mut config, sink.clone(), SessionOptions::default()).unwrap();
    sink.declare(&StreamLayout::derive(&session.geometry(), session.params()));

    // no writer draining: the queue fills up
    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    session.stop().unwrap();

    let stats = queue.stats();
    assert!(stats.dropped_video > 0);
    assert_eq!(stats.dropped_audio, 0);
    assert_eq!(sink.stats().video_frames, 1);
    assert!(session.delegate_stats().sink_errors > 0);
    assert!(sink.stats().audio_packets > sink.stats().video_frames);
}
