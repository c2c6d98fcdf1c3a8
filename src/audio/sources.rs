//! Input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDevice {
    /// Device name as reported by the host
    pub name: String,

    /// Whether this is the host's default input
    pub is_default: bool,

    /// Default sample rate, if the device reports one
    pub default_sample_rate: Option<u32>,

    /// Default channel count, if the device reports one
    pub default_channels: Option<u16>,
}

/// Audio source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No default input device")]
    NoDefaultInput,
}

/// List available input devices (microphones), default first
pub fn list_input_devices() -> Result<Vec<InputDevice>, SourceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;

    let mut sources: Vec<InputDevice> = devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok();
            Some(InputDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
                name,
            })
        })
        .collect();

    sort_default_first(&mut sources);
    Ok(sources)
}

/// Resolve an input device by exact name, or the host default for `None`
pub fn find_input_device(name: Option<&str>) -> Result<cpal::Device, SourceError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| SourceError::EnumerationError(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| SourceError::DeviceNotFound(wanted.to_string())),
        None => host
            .default_input_device()
            .ok_or(SourceError::NoDefaultInput),
    }
}

fn sort_default_first(sources: &mut [InputDevice]) {
    // Stable, so host order is kept among the rest
    sources.sort_by_key(|s| !s.is_default);
}
