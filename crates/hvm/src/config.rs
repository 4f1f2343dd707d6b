//! Runtime configuration for the HVM

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a VM instance.
///
/// Every section falls back to its defaults, so an empty TOML file is a
/// valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvmConfig {
    pub memory: MemoryConfig,
    pub relay: RelayConfig,
    pub display: DisplayConfig,
}

/// Shared kernel memory bounds, in wasm pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub initial_pages: u32,
    pub max_pages: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_pages: 2,
            max_pages: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Pause between two register polls. Zero only yields the thread.
    pub poll_interval_us: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 250,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Frame clock rate driving the render tick
    pub fps: u32,
    /// Height of one text row on the surface
    pub line_height: f64,
    /// Height of the visible viewport
    pub client_height: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            line_height: 16.0,
            client_height: 768.0,
        }
    }
}

impl DisplayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

impl HvmConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.initial_pages == 0 {
            return Err(ConfigError::Invalid(
                "memory.initial_pages must be at least 1".to_string(),
            ));
        }
        if self.memory.max_pages < self.memory.initial_pages {
            return Err(ConfigError::Invalid(format!(
                "memory.max_pages ({}) is below memory.initial_pages ({})",
                self.memory.max_pages, self.memory.initial_pages
            )));
        }
        if self.display.fps == 0 {
            return Err(ConfigError::Invalid("display.fps must be at least 1".to_string()));
        }
        if self.display.line_height <= 0.0 || self.display.client_height <= 0.0 {
            return Err(ConfigError::Invalid(
                "display.line_height and display.client_height must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
