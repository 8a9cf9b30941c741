use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::recognizer::Profile;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full-page profiles tried when choosing the base pass.
pub const DEFAULT_PAGE_PROFILES: &[Profile] = &[
    Profile::new(1, 6),
    Profile::new(3, 6),
    Profile::new(1, 4),
    Profile::new(1, 11),
];

/// Per-line profiles: single line, block, single word, raw line.
pub const DEFAULT_LINE_PROFILES: &[Profile] = &[
    Profile::new(1, 7),
    Profile::new(3, 7),
    Profile::new(1, 6),
    Profile::new(1, 8),
    Profile::new(1, 13),
];

/// Tunables for one receipt-processing run. Every field has a default, so a
/// partial TOML file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub page_profiles: Vec<Profile>,
    pub line_profiles: Vec<Profile>,
    /// Recognition calls allowed in flight at once.
    pub max_concurrency: usize,
    pub recognition_timeout_ms: u64,
    /// Pixels added around each line box before cropping.
    pub crop_padding: u32,
    /// Longer image side is scaled down to this.
    pub max_image_side: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_profiles: DEFAULT_PAGE_PROFILES.to_vec(),
            line_profiles: DEFAULT_LINE_PROFILES.to_vec(),
            max_concurrency: std::thread::available_parallelism().map_or(4, |n| n.get()),
            recognition_timeout_ms: 10_000,
            crop_padding: 8,
            max_image_side: 2800,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_profiles.is_empty() || self.line_profiles.is_empty() {
            return Err(ConfigError::Invalid("profile lists must not be empty".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.max_image_side == 0 {
            return Err(ConfigError::Invalid("max_image_side must be at least 1".into()));
        }
        Ok(())
    }
}
