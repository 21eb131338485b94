//! Driver configuration
//!
//! Default geometry and platform limits, loadable from a TOML file.
//! Every key is optional:
//!
//! ```toml
//! width = 800
//! height = 480
//! default_depth = 16
//! default_virtual_height = 480
//! max_scanlines = 1200
//! commit_timeout_ms = 1000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Framebuffer driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FbConfig {
    /// Width of the mode applied at attach time
    pub width: u32,
    /// Height of the mode applied at attach time
    pub height: u32,
    /// Depth used when a request leaves bits-per-pixel unset
    pub default_depth: u32,
    /// Virtual height used when a request asks for the maximum
    pub default_virtual_height: u32,
    /// Largest effective vertical line count accepted
    pub max_scanlines: u32,
    /// Upper bound on one descriptor round-trip
    pub commit_timeout_ms: u64,
}

impl Default for FbConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            default_depth: 16,
            default_virtual_height: 480,
            max_scanlines: 1200,
            commit_timeout_ms: 1000,
        }
    }
}

impl FbConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FbConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> String {
        // A flat struct of integers always serializes
        toml::to_string(self).unwrap_or_default()
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "default geometry {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.default_virtual_height == 0 {
            return Err(ConfigError::Invalid(
                "default_virtual_height must be non-zero".to_string(),
            ));
        }
        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "commit_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
