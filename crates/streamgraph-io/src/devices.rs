//! Output device enumeration through cpal.

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

use crate::Result;

pub(crate) fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Audio device information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Whether the device supports audio input.
    pub is_input: bool,
    /// Whether the device supports audio output.
    pub is_output: bool,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// List the devices of the default host, output devices first.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDevice> = Vec::new();

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device_name(&device) {
                devices.push(AudioDevice {
                    name,
                    is_input: device.default_input_config().is_ok(),
                    is_output: true,
                    default_sample_rate: device
                        .default_output_config()
                        .map(|c| c.sample_rate())
                        .unwrap_or(48000),
                });
            }
        }
    }

    // Input-only devices
    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device_name(&device)
                && !devices.iter().any(|d| d.name == name)
            {
                devices.push(AudioDevice {
                    name,
                    is_input: true,
                    is_output: false,
                    default_sample_rate: device
                        .default_input_config()
                        .map(|c| c.sample_rate())
                        .unwrap_or(48000),
                });
            }
        }
    }

    tracing::debug!(count = devices.len(), "enumerated audio devices");
    Ok(devices)
}

/// The default host's default output device, if any.
pub fn default_output_device() -> Result<Option<AudioDevice>> {
    let host = cpal::default_host();
    Ok(host.default_output_device().and_then(|d| {
        device_name(&d).ok().map(|name| AudioDevice {
            name,
            is_input: false,
            is_output: true,
            default_sample_rate: d.default_output_config().map(|c| c.sample_rate()).unwrap_or(48000),
        })
    }))
}
