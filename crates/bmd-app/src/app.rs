use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bmd_capture::sim::{SimApi, SimDeviceSpec};
use bmd_capture::{enumerate_display_modes, list_devices, DeckLinkApi, DeviceSession, SessionOptions};
use bmd_core::{CaptureConfig, CaptureError, IoDirections, StopReason, StopSignal};
use bmd_writer::{
    open_muxer, ContainerFormat, MuxError, PacketQueue, PacketWriter, QueueSink, RecorderConfig,
    StreamLayout,
};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::FileConfig;

/// Entry point after argument parsing.
///
/// # Flow
/// 1. Merge the `--config` file (if any) with the command line
/// 2. `-l`: print devices and display modes, then exit
/// 3. Otherwise resolve the output container and run [`record`] on a
///    blocking thread until Ctrl-C or the frame limit
pub async fn run(cli: Cli) -> Result<()> {
    let FileConfig { mut capture, mut recorder } = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    cli.apply(&mut capture, &mut recorder);

    let api = backend(cli.simulate)?;

    if cli.list {
        return list(&*api);
    }

    let output = recorder
        .output
        .clone()
        .ok_or_else(|| anyhow!("Missing argument: Please specify output path using -f"))?;
    let container = recorder.container(&output).map_err(|e| match e {
        MuxError::UnknownFormat(_) => {
            anyhow!("Unable to guess output format, please specify explicitly using -F")
        }
        other => other.into(),
    })?;

    // ── Ctrl-C → stop ──────────────────────────────────────────────────────
    let stop = StopSignal::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && on_signal.trigger(StopReason::Interrupted) {
            info!("Interrupt received");
        }
    });

    tokio::task::spawn_blocking(move || record(api, capture, recorder, output, container, stop))
        .await
        .context("Capture task panicked")?
}

fn backend(simulate: bool) -> Result<Arc<dyn DeckLinkApi>> {
    if simulate {
        info!("Using the simulated DeckLink card");
        return Ok(Arc::new(SimApi::single(SimDeviceSpec::mini_recorder())));
    }
    bail!("No DeckLink driver binding is available in this build; use --simulate")
}

// ── Listing ────────────────────────────────────────────────────────────────────

fn list(api: &dyn DeckLinkApi) -> Result<()> {
    let devices = list_devices(api).context("Listing DeckLink devices")?;
    if devices.is_empty() {
        println!("No DeckLink devices found");
        return Ok(());
    }

    for dev in &devices {
        let detection = match dev.format_detection {
            Some(true) => "yes",
            Some(false) => "no",
            None => "unknown",
        };
        println!(
            "Device {}: {} (input: {}, output: {}, format detection: {})",
            dev.index, dev.model_name, dev.has_input, dev.has_output, detection
        );

        let mut mode_index = 0;
        let mut last_direction = None;
        enumerate_display_modes(api, Some(dev.index), IoDirections::ANY, |_, direction, mode| {
            if last_direction != Some(direction) {
                println!("  {} modes:", direction);
                last_direction = Some(direction);
                mode_index = 0;
            }
            println!(
                "    {:>2}: {:<16} {}x{} {:.2} fps {}",
                mode_index,
                mode.name,
                mode.width,
                mode.height,
                mode.frame_rate.fps(),
                mode.id
            );
            mode_index += 1;
        })?;
    }
    Ok(())
}

// ── Capture run ────────────────────────────────────────────────────────────────

/// Negotiate, capture until stopped, and finalise the output file.
///
/// The queue and sink exist before the session so the hardware callback has
/// somewhere to deliver; the layout is declared once negotiation resolves it.
fn record(
    api: Arc<dyn DeckLinkApi>,
    mut capture: CaptureConfig,
    recorder: RecorderConfig,
    output: PathBuf,
    container: ContainerFormat,
    stop: StopSignal,
) -> Result<()> {
    let queue = Arc::new(PacketQueue::new(recorder.memory_limit_bytes(), recorder.drop_policy));
    let sink = Arc::new(
        QueueSink::new(queue.clone(), stop.clone())
            .with_max_frames(recorder.max_frames)
            .with_verbose(recorder.verbose),
    );

    let options = SessionOptions {
        probe_timeout: recorder.probe_timeout(),
        stop:          Some(stop.clone()),
    };
    let mut session = match DeviceSession::open(&*api, &mut capture, sink.clone(), options) {
        Ok(session) => session,
        Err(CaptureError::ProbeCancelled) => {
            info!("Stopping Capture (interrupted while detecting the input format)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let geometry = session.geometry();
    let layout = StreamLayout::derive(&geometry, session.params());
    sink.declare(&layout);

    info!(
        "Recording {} ({}x{} {:?}, {:.2} fps, {} ch / {} bit) → {} [{}]",
        session.display_mode().name,
        geometry.width,
        geometry.height,
        geometry.field_mode,
        geometry.timebase.fps(),
        layout.audio.channels,
        layout.audio.codec.bits(),
        output.display(),
        container
    );

    let muxer = open_muxer(container, &output, &layout)?;
    let writer = PacketWriter::spawn(queue.clone(), muxer)?;

    if let Err(e) = session.start() {
        queue.abort();
        match writer.join() {
            Ok((mut muxer, _)) => {
                if let Err(finish) = muxer.finish() {
                    warn!("Finishing {} after failed start: {}", output.display(), finish);
                }
            }
            Err(join) => warn!("Writer thread after failed start: {}", join),
        }
        return Err(e).context("Starting capture streams");
    }

    let reason = stop.wait();
    info!("Stopping Capture ({:?})", reason);

    if let Err(e) = session.stop() {
        warn!("Stopping streams failed: {e}");
    }
    let delegate = session.delegate_stats();
    drop(session);

    // Packets queued before the abort are still written.
    queue.abort();
    let (mut muxer, written) = writer.join()?;
    let muxed = muxer.finish()?;

    let queued = queue.stats();
    let sunk = sink.stats();
    if queued.dropped_video > 0 || queued.dropped_audio > 0 {
        warn!(
            "Queue full: dropped {} video / {} audio packets (limit {} MiB)",
            queued.dropped_video,
            queued.dropped_audio,
            queue.limit() >> 20
        );
    }
    if delegate.no_signal > 0 {
        warn!("{} frames arrived without an input signal", delegate.no_signal);
    }
    info!(
        "Captured {} video frames / {} audio packets; wrote {} + {} packets ({} MiB, {} write errors), peak queue {} MiB",
        sunk.video_frames,
        sunk.audio_packets,
        muxed.video_packets,
        muxed.audio_packets,
        written.bytes >> 20,
        written.write_errors,
        queued.high_water >> 20
    );
    Ok(())
}
