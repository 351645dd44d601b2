use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::layout::ContainerFormat;
use crate::muxer::MuxError;
use crate::queue::AdmissionPolicy;

/// Output-side settings of a capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub output:             Option<PathBuf>,
    /// Container short name; guessed from `output` when absent.
    pub format:             Option<String>,
    #[serde(alias = "memoryLimitGib")]
    pub memory_limit_gib:   u64,
    #[serde(alias = "dropPolicy")]
    pub drop_policy:        AdmissionPolicy,
    /// Stop after this many video frames.
    #[serde(alias = "maxFrames")]
    pub max_frames:         Option<u64>,
    /// `None` waits for a signal indefinitely.
    #[serde(alias = "probeTimeoutSecs")]
    pub probe_timeout_secs: Option<f64>,
    pub verbose:            bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output:             None,
            format:             None,
            memory_limit_gib:   1,
            drop_policy:        AdmissionPolicy::DropNewest,
            max_frames:         None,
            probe_timeout_secs: Some(10.0),
            verbose:            false,
        }
    }
}

impl RecorderConfig {
    pub fn memory_limit_bytes(&self) -> usize {
        usize::try_from(self.memory_limit_gib.saturating_mul(1 << 30)).unwrap_or(usize::MAX)
    }

    /// Zero or negative values mean no timeout.
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Resolve the container: explicit `format` first, then the extension.
    pub fn container(&self, output: &Path) -> Result<ContainerFormat, MuxError> {
        match &self.format {
            Some(name) => ContainerFormat::from_name(name)
                .ok_or_else(|| MuxError::UnsupportedFormat(name.clone())),
            None => ContainerFormat::guess(output)
                .ok_or_else(|| MuxError::UnknownFormat(output.to_owned())),
        }
    }
}
