//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Description of a device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices, inputs first
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up in both lists
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Ordered names of every input and output device.
///
/// This is what the device monitor compares between polls; enumeration
/// failures yield an empty list rather than an error.
pub fn device_names() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(inputs) = host.input_devices() {
        names.extend(inputs.filter_map(|d| d.name().ok()));
    }
    if let Ok(outputs) = host.output_devices() {
        names.extend(outputs.filter_map(|d| d.name().ok()));
    }
    names
}

fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [16000u32, 24000, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Default microphone
pub fn default_input_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Find an output device whose name contains `pattern` (case-insensitive).
///
/// With `fallback_to_default` the system default output is used when nothing
/// matches; otherwise a missing device is an error.
pub fn find_output_device(pattern: &str, fallback_to_default: bool) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let names: Vec<(cpal::Device, String)> = outputs
        .filter_map(|d| d.name().ok().map(|n| (d, n)))
        .collect();
    let listed: Vec<&str> = names.iter().map(|(_, n)| n.as_str()).collect();

    if let Some(index) = match_device_name(&listed, pattern) {
        let (device, name) = names.into_iter().nth(index).ok_or_else(|| {
            AudioError::DeviceNotFound(pattern.to_string())
        })?;
        tracing::info!("Found output device: {}", name);
        return Ok(device);
    }

    if fallback_to_default {
        tracing::warn!("Output device '{}' not found, using system default", pattern);
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    }

    Err(AudioError::DeviceNotFound(pattern.to_string()))
}

/// Index of the first name containing `pattern`, ignoring case
pub fn match_device_name(names: &[&str], pattern: &str) -> Option<usize> {
    let needle = pattern.to_lowercase();
    names.iter().position(|n| n.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_device_name_case_insensitive() {
        let names = ["Speakers (Realtek)", "CABLE Input (VB-Audio Virtual Cable)", "BlackHole 2ch"];
        assert_eq!(match_device_name(&names, "cable input"), Some(1));
        assert_eq!(match_device_name(&names, "BlackHole 2ch"), Some(2));
        assert_eq!(match_device_name(&names, "Headset"), None);
    }

    #[test]
    fn test_list_devices_does_not_panic() {
        // May be empty on CI machines without audio hardware
        let devices = list_devices();
        for device in &devices {
            assert!(device.is_input || device.is_output);
        }
    }
}
