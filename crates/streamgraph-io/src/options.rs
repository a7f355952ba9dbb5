//! Runtime options of a graph and its drivers.

use std::time::Duration;

use streamgraph_config::GraphConfig;
use streamgraph_core::{CoreOptions, TrackRate};

use crate::backend::BackendStreamConfig;

/// Everything a [`MediaStreamGraph`](crate::MediaStreamGraph) needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOptions {
    /// Graph rate in ticks per second.
    pub rate: TrackRate,
    /// Channels of the mixed output.
    pub output_channels: usize,
    /// Realtime graphs start lazily on their first message and move between
    /// the system-clock and audio-callback drivers. Other graphs render
    /// offline once [`start_offline`](crate::MediaStreamGraph::start_offline)
    /// is called.
    pub realtime: bool,
    /// Wall-clock interval between system-clock iterations.
    pub system_clock_interval: Duration,
    /// Frames computed per offline iteration.
    pub offline_slice_frames: u32,
    /// Buffer size requested from the audio device.
    pub audio_buffer_frames: u32,
    /// Substring of the output device name.
    pub device_name: Option<String>,
    /// Bound on how long shutdown waits for a driver or device.
    pub shutdown_timeout: Duration,
    /// Graph time kept on the system clock after the device failed.
    pub fallback_retry: Duration,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::from(&GraphConfig::default())
    }
}

impl GraphOptions {
    /// Defaults for a realtime graph at `rate`.
    pub fn realtime(rate: TrackRate) -> Self {
        Self {
            rate,
            realtime: true,
            ..Self::default()
        }
    }

    /// Defaults for an offline graph at `rate`.
    pub fn offline(rate: TrackRate) -> Self {
        Self {
            rate,
            realtime: false,
            ..Self::default()
        }
    }

    pub(crate) fn core_options(&self) -> CoreOptions {
        CoreOptions {
            rate: self.rate,
            output_channels: self.output_channels,
            realtime: self.realtime,
        }
    }

    pub(crate) fn stream_config(&self) -> BackendStreamConfig {
        BackendStreamConfig {
            sample_rate: self.rate,
            buffer_size: self.audio_buffer_frames,
            channels: self.output_channels as u16,
            device_name: self.device_name.clone(),
        }
    }
}

impl From<&GraphConfig> for GraphOptions {
    fn from(config: &GraphConfig) -> Self {
        let driver = &config.driver;
        Self {
            rate: config.sample_rate,
            output_channels: usize::from(config.output_channels),
            realtime: config.realtime,
            system_clock_interval: Duration::from_millis(driver.system_clock_interval_ms),
            offline_slice_frames: driver.offline_slice_frames,
            audio_buffer_frames: driver.audio_buffer_frames,
            device_name: driver.device_name.clone(),
            shutdown_timeout: Duration::from_millis(driver.shutdown_timeout_ms),
            fallback_retry: Duration::from_millis(driver.fallback_retry_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = GraphConfig {
            sample_rate: 44100,
            driver: streamgraph_config::DriverConfig {
                system_clock_interval_ms: 5,
                device_name: Some("usb".to_string()),
                ..Default::default()
            },
            ..GraphConfig::default()
        };
        let options = GraphOptions::from(&config);
        assert_eq!(options.rate, 44100);
        assert_eq!(options.system_clock_interval, Duration::from_millis(5));
        assert_eq!(options.stream_config().device_name.as_deref(), Some("usb"));
        assert_eq!(options.stream_config().channels, 2);
    }

    #[test]
    fn test_offline_defaults() {
        let options = GraphOptions::offline(22050);
        assert!(!options.realtime);
        assert!(!options.core_options().realtime);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(1));
    }
}
