//! GStreamer container muxer.
//!
//! # Pipeline
//!
//! ```text
//! appsrc vsrc (video/x-raw, UYVY|v210|…) → queue ─┐
//!                                                  ├→ matroskamux|qtmux|avimux → filesink
//! appsrc asrc (audio/x-raw, S16LE|S32LE) → queue ─┘
//! ```
//!
//! Packets are pushed as-is; timestamps are converted from each stream's
//! timebase to nanoseconds.

use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use tracing::{debug, info, warn};

use bmd_core::{FieldMode, Rational};

use crate::layout::{ContainerFormat, StreamLayout};
use crate::muxer::{MuxError, MuxStats, Muxer};
use crate::packet::{MediaPacket, StreamKind};

/// How long `finish` waits for the muxer to write its trailer.
const EOS_TIMEOUT_SECS: u64 = 10;

fn mux_element(format: ContainerFormat) -> Result<&'static str, MuxError> {
    match format {
        ContainerFormat::Matroska => Ok("matroskamux"),
        ContainerFormat::QuickTime => Ok("qtmux"),
        ContainerFormat::Avi => Ok("avimux"),
        ContainerFormat::Raw => Err(MuxError::UnsupportedFormat("raw".into())),
    }
}

fn interlace_mode(field_mode: FieldMode) -> &'static str {
    if field_mode.is_interlaced() {
        "interleaved"
    } else {
        "progressive"
    }
}

/// `pts` units of `timebase` → nanoseconds.
fn to_clock(pts: i64, timebase: Rational) -> Option<gst::ClockTime> {
    if pts < 0 || timebase.den <= 0 {
        return None;
    }
    let ns = pts as i128 * timebase.num as i128 * 1_000_000_000 / timebase.den as i128;
    u64::try_from(ns).ok().map(gst::ClockTime::from_nseconds)
}

pub struct GstMuxer {
    pipeline: gst::Pipeline,
    video:    AppSrc,
    audio:    AppSrc,
    layout:   StreamLayout,
    stats:    MuxStats,
    finished: bool,
}

impl GstMuxer {
    pub fn open(
        format: ContainerFormat,
        path: &Path,
        layout: &StreamLayout,
    ) -> Result<Self, MuxError> {
        gst::init().map_err(|e| MuxError::Pipeline(e.to_string()))?;
        let mux = mux_element(format)?;
        let v = &layout.video;
        let a = &layout.audio;

        // framerate is the inverse of the timebase
        let desc = format!(
            "appsrc name=vsrc format=time \
                 caps=\"video/x-raw,format={vfmt},width={w},height={h},\
                        framerate={fden}/{fnum},interlace-mode={il}\" \
             ! queue ! {mux} name=mux ! filesink location=\"{loc}\" \
             appsrc name=asrc format=time \
                 caps=\"audio/x-raw,format={afmt},layout=interleaved,rate={rate},channels={ch}\" \
             ! queue ! mux.",
            vfmt = v.codec.caps_format(),
            w = v.width,
            h = v.height,
            fden = v.timebase.den,
            fnum = v.timebase.num,
            il = interlace_mode(v.field_mode),
            loc = path.display(),
            afmt = a.codec.caps_format(),
            rate = a.sample_rate,
            ch = a.channels,
        );
        debug!("Muxer pipeline: {}", desc);

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| MuxError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| MuxError::Pipeline("Not a pipeline".into()))?;
        let appsrc = |name: &str| {
            pipeline
                .by_name(name)
                .and_then(|e| e.downcast::<AppSrc>().ok())
                .ok_or_else(|| MuxError::Pipeline(format!("No appsrc '{name}'")))
        };
        let video = appsrc("vsrc")?;
        let audio = appsrc("asrc")?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| MuxError::Pipeline("Failed to start pipeline".into()))?;
        info!("{} output: {} via {}", format, path.display(), mux);

        Ok(Self {
            pipeline,
            video,
            audio,
            layout:   *layout,
            stats:    MuxStats::default(),
            finished: false,
        })
    }
}

impl Muxer for GstMuxer {
    fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), MuxError> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        let (src, timebase) = match packet.stream {
            StreamKind::Video => (&self.video, self.layout.video.timebase),
            StreamKind::Audio => (&self.audio, self.layout.audio.timebase),
        };
        let mut buffer = gst::Buffer::from_slice(packet.data.clone());
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(to_clock(packet.pts, timebase));
            buf.set_dts(to_clock(packet.pts, timebase));
            if packet.duration > 0 {
                buf.set_duration(to_clock(packet.duration, timebase));
            }
        }
        src.push_buffer(buffer)
            .map_err(|e| MuxError::Pipeline(format!("appsrc push_buffer: {e:?}")))?;
        self.stats.record(packet);
        Ok(())
    }

    fn finish(&mut self) -> Result<MuxStats, MuxError> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        self.finished = true;
        for (name, src) in [("video", &self.video), ("audio", &self.audio)] {
            if let Err(e) = src.end_of_stream() {
                warn!("{} appsrc end_of_stream: {:?}", name, e);
            }
        }

        let mut result = Ok(self.stats);
        if let Some(bus) = self.pipeline.bus() {
            let msg = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
            match msg.as_ref().map(|m| m.view()) {
                Some(gst::MessageView::Eos(_)) => debug!("Muxer reached EOS"),
                Some(gst::MessageView::Error(err)) => {
                    result = Err(MuxError::Pipeline(format!("{} ({:?})", err.error(), err.debug())));
                }
                _ => warn!(
                    "Muxer did not reach EOS within {}s; trailer may be missing",
                    EOS_TIMEOUT_SECS
                ),
            }
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|_| MuxError::Pipeline("Failed to stop pipeline".into()))?;
        result
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
