//! Graph and driver configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Highest output channel count a graph can mix to.
pub const MAX_OUTPUT_CHANNELS: u16 = 8;

/// Settings for one media stream graph.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes:
///
/// ```toml
/// sample_rate = 44100
///
/// [driver]
/// device_name = "USB Audio"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Graph rate in ticks per second.
    pub sample_rate: u32,
    /// Channels of the mixed output.
    pub output_channels: u16,
    /// Paced by a clock or audio device (true) or rendered offline (false).
    pub realtime: bool,
    /// Driver tuning.
    pub driver: DriverConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            output_channels: 2,
            realtime: true,
            driver: DriverConfig::default(),
        }
    }
}

/// Tuning of the drivers that run a graph's iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wall-clock interval between system-clock iterations.
    pub system_clock_interval_ms: u64,
    /// Frames computed per offline iteration.
    pub offline_slice_frames: u32,
    /// Buffer size requested from the audio device.
    pub audio_buffer_frames: u32,
    /// Substring of the output device name; the default device when unset.
    pub device_name: Option<String>,
    /// How long shutdown waits for a driver before giving up on it.
    pub shutdown_timeout_ms: u64,
    /// Graph time spent on the system clock after an audio device failure
    /// before the audio callback is tried again.
    pub fallback_retry_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            system_clock_interval_ms: 10,
            offline_slice_frames: 1024,
            audio_buffer_frames: 512,
            device_name: None,
            shutdown_timeout_ms: 1000,
            fallback_retry_ms: 1000,
        }
    }
}

impl GraphConfig {
    /// Load a configuration from a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load the file at `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.is_file() { Self::load(path) } else { Ok(Self::default()) }
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GraphConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every value is usable by a graph.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=384_000).contains(&self.sample_rate) {
            return Err(ConfigError::invalid(
                "sample_rate",
                format!("{} is outside 8000..=384000", self.sample_rate),
            ));
        }
        if self.output_channels == 0 || self.output_channels > MAX_OUTPUT_CHANNELS {
            return Err(ConfigError::invalid(
                "output_channels",
                format!("{} is outside 1..={MAX_OUTPUT_CHANNELS}", self.output_channels),
            ));
        }
        let d = &self.driver;
        if d.system_clock_interval_ms == 0 {
            return Err(ConfigError::invalid("driver.system_clock_interval_ms", "must be positive"));
        }
        if d.offline_slice_frames == 0 {
            return Err(ConfigError::invalid("driver.offline_slice_frames", "must be positive"));
        }
        if d.audio_buffer_frames == 0 {
            return Err(ConfigError::invalid("driver.audio_buffer_frames", "must be positive"));
        }
        if d.shutdown_timeout_ms == 0 {
            return Err(ConfigError::invalid("driver.shutdown_timeout_ms", "must be positive"));
        }
        Ok(())
    }
}
