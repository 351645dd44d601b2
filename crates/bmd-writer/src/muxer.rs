//! The muxer capability and the built-in raw muxer.
//!
//! A muxer is opened with the [`StreamLayout`] (header written), receives
//! packets in queue order from the writer thread, and is finished once by
//! the control thread after the writer has drained.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::layout::{AudioStream, ContainerFormat, StreamLayout};
use crate::packet::{MediaPacket, StreamKind};

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to guess output format for {}, please specify explicitly using -F", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Unsupported container format '{0}'")]
    UnsupportedFormat(String),

    #[error("{0} output requires building with the `gstreamer` feature")]
    FeatureDisabled(ContainerFormat),

    #[error("GStreamer pipeline error: {0}")]
    Pipeline(String),

    #[error("Muxer already finished")]
    Finished,

    #[error("Writer thread panicked")]
    WriterPanicked,
}

impl MuxError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io { path: path.to_owned(), source }
    }
}

/// Totals reported by [`Muxer::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub video_bytes:   u64,
    pub audio_bytes:   u64,
}

impl MuxStats {
    pub(crate) fn record(&mut self, packet: &MediaPacket) {
        let len = packet.data.len() as u64;
        match packet.stream {
            StreamKind::Video => {
                self.video_packets += 1;
                self.video_bytes += len;
            }
            StreamKind::Audio => {
                self.audio_packets += 1;
                self.audio_bytes += len;
            }
        }
    }
}

pub trait Muxer: Send {
    fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), MuxError>;

    /// Write the trailer and close the output.
    fn finish(&mut self) -> Result<MuxStats, MuxError>;
}

/// Open the muxer for `format` at `path`, declaring the streams of `layout`.
pub fn open_muxer(
    format: ContainerFormat,
    path: &Path,
    layout: &StreamLayout,
) -> Result<Box<dyn Muxer>, MuxError> {
    match format {
        ContainerFormat::Raw => Ok(Box::new(RawMuxer::create(path, layout)?)),
        #[cfg(feature = "gstreamer")]
        other => Ok(Box::new(crate::gst::GstMuxer::open(other, path, layout)?)),
        #[cfg(not(feature = "gstreamer"))]
        other => Err(MuxError::FeatureDisabled(other)),
    }
}

// ── WAV ───────────────────────────────────────────────────────────────────────

const WAV_HEADER_LEN: u64 = 44;

/// PCM WAV file whose RIFF sizes are patched when finished.
pub(crate) struct WavWriter {
    file:       BufWriter<File>,
    path:       PathBuf,
    data_bytes: u64,
}

impl WavWriter {
    pub(crate) fn create(path: &Path, stream: &AudioStream) -> Result<Self, MuxError> {
        let file = File::create(path).map_err(MuxError::io(path))?;
        let mut file = BufWriter::new(file);
        file.write_all(&wav_header(stream, 0)).map_err(MuxError::io(path))?;
        Ok(Self { file, path: path.to_owned(), data_bytes: 0 })
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> Result<(), MuxError> {
        self.file.write_all(data).map_err(MuxError::io(&self.path))?;
        self.data_bytes += data.len() as u64;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), MuxError> {
        let data = u32::try_from(self.data_bytes).unwrap_or(u32::MAX);
        let riff = data.saturating_add(WAV_HEADER_LEN as u32 - 8);
        self.patch_sizes(riff, data).map_err(MuxError::io(&self.path))
    }

    fn patch_sizes(&mut self, riff: u32, data: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(4))?;
        self.file.write_all(&riff.to_le_bytes())?;
        self.file.seek(SeekFrom::Start(40))?;
        self.file.write_all(&data.to_le_bytes())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()
    }
}

fn wav_header(stream: &AudioStream, data_bytes: u32) -> [u8; WAV_HEADER_LEN as usize] {
    let bits = stream.codec.bits();
    let block_align = stream.block_align();
    let byte_rate = stream.sample_rate * block_align;

    let mut h = [0u8; WAV_HEADER_LEN as usize];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&data_bytes.saturating_add(36).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    h[22..24].copy_from_slice(&(stream.channels as u16).to_le_bytes());
    h[24..28].copy_from_slice(&stream.sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&(block_align as u16).to_le_bytes());
    h[34..36].copy_from_slice(&(bits as u16).to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_bytes.to_le_bytes());
    h
}

// ── RawMuxer ──────────────────────────────────────────────────────────────────

/// Video packets appended back to back to the output file; audio to a
/// sibling `.wav`.
pub struct RawMuxer {
    video:      BufWriter<File>,
    video_path: PathBuf,
    audio:      WavWriter,
    stats:      MuxStats,
    finished:   bool,
}

impl RawMuxer {
    pub fn create(path: &Path, layout: &StreamLayout) -> Result<Self, MuxError> {
        let audio_path = Self::audio_path(path);
        let video = File::create(path).map_err(MuxError::io(path))?;
        let audio = WavWriter::create(&audio_path, &layout.audio)?;
        info!(
            "Raw output: {} ({:?} {}x{}), audio {} ({}ch {}-bit)",
            path.display(),
            layout.video.codec,
            layout.video.width,
            layout.video.height,
            audio_path.display(),
            layout.audio.channels,
            layout.audio.codec.bits(),
        );
        Ok(Self {
            video: BufWriter::new(video),
            video_path: path.to_owned(),
            audio,
            stats: MuxStats::default(),
            finished: false,
        })
    }

    /// Where the audio of a raw capture to `path` goes: `out.yuv` → `out.wav`.
    /// An output that already ends in `.wav` keeps its name and gets
    /// `out.wav.audio.wav` alongside.
    pub fn audio_path(path: &Path) -> PathBuf {
        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return path.with_extension("wav");
        }
        let mut name = path.as_os_str().to_owned();
        name.push(".audio.wav");
        PathBuf::from(name)
    }
}

impl Muxer for RawMuxer {
    fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), MuxError> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        match packet.stream {
            StreamKind::Video => self
                .video
                .write_all(&packet.data)
                .map_err(MuxError::io(&self.video_path))?,
            StreamKind::Audio => self.audio.write(&packet.data)?,
        }
        self.stats.record(packet);
        Ok(())
    }

    fn finish(&mut self) -> Result<MuxStats, MuxError> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        self.finished = true;
        self.video.flush().map_err(MuxError::io(&self.video_path))?;
        self.audio.finish()?;
        debug!("Raw muxer finished: {:?}", self.stats);
        Ok(self.stats)
    }
}
