//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::EngineError;

/// Information about an audio device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

/// List all available audio devices, merging input and output entries by name
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = capabilities(&device, true);
            devices.push(DeviceInfo {
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                max_input_channels: channels,
                max_output_channels: 0,
            });
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = capabilities(&device, false);
            let is_default = default_output_name.as_ref() == Some(&name);

            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                existing.max_output_channels = channels;
                for rate in sample_rates {
                    if !existing.sample_rates.contains(&rate) {
                        existing.sample_rates.push(rate);
                    }
                }
                existing.sample_rates.sort_unstable();
            } else {
                devices.push(DeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    max_input_channels: 0,
                    max_output_channels: channels,
                });
            }
        }
    }

    devices
}

/// Common rates a device supports, and its widest channel count
fn capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, u16) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut rates = Vec::new();
    let mut channels = 0;
    for config in &configs {
        for rate in [44100u32, 48000, 88200, 96000, 176400, 192000] {
            let sr = cpal::SampleRate(rate);
            if sr >= config.min_sample_rate() && sr <= config.max_sample_rate() && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
        channels = channels.max(config.channels());
    }
    rates.sort_unstable();

    (rates, channels)
}

/// Output device by name, or the host default
pub fn output_device(name: Option<&str>) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| EngineError::DeviceNotFound(name.to_string())),
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::DeviceNotFound("No default output device".to_string())),
    }
}

/// Input device by name, or the host default. `Ok(None)` when the host has
/// no capture device at all; a named device that is missing is an error.
pub fn input_device(name: Option<&str>) -> Result<Option<cpal::Device>, EngineError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .map(Some)
            .ok_or_else(|| EngineError::DeviceNotFound(name.to_string())),
        None => Ok(host.default_input_device()),
    }
}

/// Log every device the host can see
pub fn log_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        tracing::warn!("No audio devices found");
        return;
    }
    for device in devices {
        tracing::debug!(
            "Device '{}'{}: in={} out={} rates={:?}",
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.max_input_channels,
            device.max_output_channels,
            device.sample_rates
        );
    }
}
