use std::path::Path;

use anyhow::{Context, Result};
use bmd_core::CaptureConfig;
use bmd_writer::RecorderConfig;
use serde::{Deserialize, Serialize};

/// Contents of a `--config` file. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub capture:  CaptureConfig,
    pub recorder: RecorderConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Parsing config file {}", path.display()))
    }

    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let cfg = FileConfig::parse(r#"{ "capture": { "videoMode": 1 } }"#).unwrap();
        assert_eq!(cfg.capture.video_mode, 1);
        assert_eq!(cfg.recorder, RecorderConfig::default());
        assert_eq!(FileConfig::parse("{}").unwrap(), FileConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(FileConfig::parse("{ capture: 1 ").is_err());
    }
}
