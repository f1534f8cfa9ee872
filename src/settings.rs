use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::detection::{ContourConfig, ModelConfig, SortAxis};

/// Tuning knobs for detection and migration, read from a JSON file.
/// Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub contour: ContourConfig,
    pub model: ModelConfig,
    pub sort_axis: SortAxis,
    pub detection_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    /// Used for blobs whose format can't be sniffed.
    pub blob_default_extension: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            contour: ContourConfig::default(),
            model: ModelConfig::default(),
            sort_axis: SortAxis::default(),
            detection_timeout_secs: 60,
            upload_timeout_secs: 30,
            blob_default_extension: "png".into(),
        }
    }
}

impl PipelineSettings {
    /// A missing file means defaults. So does an unparsable one, with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(
                "ignoring unparsable settings file {}: {err}",
                path.display()
            );
            Self::default()
        }))
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
