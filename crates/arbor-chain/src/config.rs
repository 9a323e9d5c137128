//! Engine configuration loaded from TOML.
//!
//! ```toml
//! sample_rate = 48000.0
//! max_block_size = 512
//! oversampling = 1        # 0 = off, 1 = 2x, 2 = 4x
//! swap_crossfade_ms = 5.0
//! shutdown_timeout_ms = 500
//! ```
//!
//! Every field is optional; missing fields take the defaults above (with
//! oversampling off).

use std::path::Path;
use std::time::Duration;

use arbor_core::{DEFAULT_SWAP_CROSSFADE_MS, OversamplingFactor};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::shared::ProcessSetup;

/// Startup settings for a [`ChainProcessor`](crate::ChainProcessor) and its
/// [`ChainAudio`](crate::ChainAudio).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host sample rate in Hz.
    pub sample_rate: f32,
    /// Largest block the host will pass to `process`.
    pub max_block_size: usize,
    /// Oversampling factor index, clamped to 0..=2.
    pub oversampling: i32,
    /// Crossfade applied when the audio thread installs a new graph.
    pub swap_crossfade_ms: f32,
    /// How long shutdown waits for the audio thread to return nodes.
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 512,
            oversampling: 0,
            swap_crossfade_ms: DEFAULT_SWAP_CROSSFADE_MS,
            shutdown_timeout_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Oversampling factor after clamping the index.
    pub fn oversampling_factor(&self) -> OversamplingFactor {
        OversamplingFactor::from_index(self.oversampling)
    }

    /// Shutdown wait as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The process setup this configuration describes.
    pub fn process_setup(&self) -> ProcessSetup {
        ProcessSetup {
            sample_rate: self.sample_rate,
            max_block_size: self.max_block_size.max(1),
            oversampling: self.oversampling_factor(),
        }
    }
}
