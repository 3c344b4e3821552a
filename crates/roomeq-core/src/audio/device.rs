//! Audio device enumeration and lookup

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use serde::Serialize;

/// Sample rates probed when listing device capabilities
const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Audio device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Stable identifier (`host:name`)
    pub id: String,
    /// Device name
    pub name: String,
    /// Whether this is the default input or output device
    pub is_default: bool,
    /// Supported sample rates among the common ones
    pub sample_rates: Vec<u32>,
    /// Number of input channels
    pub input_channels: u16,
    /// Number of output channels
    pub output_channels: u16,
}

/// Device role within a measurement or playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Input,
    Output,
}

fn host() -> Host {
    cpal::default_host()
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

/// List available audio devices
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = host();
    let host_name = host.id().name();

    let default_input = host.default_input_device().map(|d| device_name(&d));
    let default_output = host.default_output_device().map(|d| device_name(&d));

    let devices = host
        .devices()
        .map_err(|e| Error::device_unavailable(format!("cannot enumerate devices: {e}")))?;

    let mut out = Vec::new();
    for device in devices {
        let name = device_name(&device);
        let is_default =
            default_input.as_deref() == Some(name.as_str())
                || default_output.as_deref() == Some(name.as_str());

        let input_channels = device
            .default_input_config()
            .map(|c| c.channels())
            .unwrap_or(0);
        let output_channels = device
            .default_output_config()
            .map(|c| c.channels())
            .unwrap_or(0);

        let mut sample_rates = Vec::new();
        if let Ok(configs) = device.supported_output_configs() {
            for config in configs {
                for &rate in &COMMON_RATES {
                    if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
        }
        sample_rates.sort_unstable();

        out.push(DeviceInfo {
            id: format!("{}:{}", host_name, name),
            name,
            is_default,
            sample_rates,
            input_channels,
            output_channels,
        });
    }

    Ok(out)
}

/// Find a device by name, or the default device for `role` when `name` is `None`
pub fn find_device(name: Option<&str>, role: DeviceRole) -> Result<Device> {
    let host = host();
    match name {
        Some(name) => host
            .devices()
            .map_err(|e| Error::device_unavailable(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| Error::device_unavailable(format!("device '{name}' not found"))),
        None => {
            let device = match role {
                DeviceRole::Input => host.default_input_device(),
                DeviceRole::Output => host.default_output_device(),
            };
            device.ok_or_else(|| Error::device_unavailable(format!("no default {role:?} device")))
        }
    }
}

/// Display name of a device
pub fn name_of(device: &Device) -> String {
    device_name(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Headless CI has no devices; enumeration must still return cleanly
        match list_devices() {
            Ok(devices) => {
                for d in &devices {
                    assert!(d.id.ends_with(&d.name));
                }
            }
            Err(e) => assert!(e.remediation().is_some()),
        }
    }

    #[test]
    fn test_missing_named_device_is_unavailable() {
        let err = find_device(Some("definitely-not-a-real-device-42"), DeviceRole::Output)
            .err()
            .expect("lookup should fail");
        assert!(matches!(err, Error::DeviceUnavailable { .. }));
    }
}
