//! Audio device enumeration and management

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Description of one host audio device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Position in the host's device enumeration. Selection resolves
    /// through the same enumeration, so devices that fail probing leave a
    /// gap in the table instead of shifting later indices.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    /// Estimated callback latency at the default configuration, in ms.
    pub default_latency_ms: f64,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

fn probe_device(
    index: usize,
    device: &cpal::Device,
    default_input: &Option<String>,
    default_output: &Option<String>,
) -> Option<DeviceInfo> {
    let name = device.name().ok()?;

    let input_config = device.default_input_config().ok();
    let output_config = device.default_output_config().ok();

    let max_input_channels = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);
    let max_output_channels = device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    let reference = output_config.as_ref().or(input_config.as_ref());
    let default_sample_rate = reference.map(|c| c.sample_rate().0).unwrap_or(0);
    let default_latency_ms = reference
        .map(|c| match c.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } if c.sample_rate().0 > 0 => {
                *min as f64 * 1000.0 / c.sample_rate().0 as f64
            }
            _ => 0.0,
        })
        .unwrap_or(0.0);

    Some(DeviceInfo {
        index,
        is_default_input: default_input.as_deref() == Some(name.as_str()),
        is_default_output: default_output.as_deref() == Some(name.as_str()),
        name,
        max_input_channels,
        max_output_channels,
        default_sample_rate,
        default_latency_ms,
    })
}

/// Enumerate every device of the default host with its capabilities.
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(all) = host.devices() {
        for (index, device) in all.enumerate() {
            if let Some(info) = probe_device(index, &device, &default_input, &default_output) {
                devices.push(info);
            }
        }
    }
    devices
}

fn device_at(index: usize) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    host.devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
        .nth(index)
        .ok_or_else(|| AudioError::DeviceNotFound(format!("device index {index}")))
}

/// Resolve an input device by list index, falling back to the host default.
pub fn input_device(index: Option<usize>) -> Result<cpal::Device, AudioError> {
    match index {
        Some(index) => device_at(index),
        None => cpal::default_host()
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string())),
    }
}

/// Resolve an output device by list index, falling back to the host default.
pub fn output_device(index: Option<usize>) -> Result<cpal::Device, AudioError> {
    match index {
        Some(index) => device_at(index),
        None => cpal::default_host()
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string())),
    }
}

/// Render the device table for the interactive menus.
pub fn format_device_table(devices: &[DeviceInfo]) -> String {
    let mut out = String::new();
    for device in devices {
        let mut tags = Vec::new();
        if device.is_default_input {
            tags.push("default input");
        }
        if device.is_default_output {
            tags.push("default output");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        out.push_str(&format!(
            "  [{}] {}{} (in: {} ch, out: {} ch, {} Hz, ~{:.1} ms)\n",
            device.index,
            device.name,
            tags,
            device.max_input_channels,
            device.max_output_channels,
            device.default_sample_rate,
            device.default_latency_ms,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Hosts without audio hardware return an empty list.
        let devices = list_devices();
        for device in &devices {
            assert!(device.is_input() || device.is_output() || device.default_sample_rate == 0);
        }
        // Indices follow the host enumeration: strictly increasing, with
        // gaps where a device failed probing.
        for pair in devices.windows(2) {
            assert!(pair[0].index < pair[1].index);
        }
    }

    #[test]
    fn test_format_device_table() {
        let devices = vec![DeviceInfo {
            index: 0,
            name: "Test Mic".to_string(),
            max_input_channels: 2,
            max_output_channels: 0,
            default_sample_rate: 48000,
            default_latency_ms: 5.3,
            is_default_input: true,
            is_default_output: false,
        }];
        let table = format_device_table(&devices);
        assert!(table.contains("[0] Test Mic"));
        assert!(table.contains("default input"));
    }
}
