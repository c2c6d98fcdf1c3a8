//! Monitor configuration

use crate::audio::{CaptureError, NoiseGateConfig, StreamConfig, WindowFunction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CaptureError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(msg) => CaptureError::Configuration(msg),
            other => CaptureError::Configuration(other.to_string()),
        }
    }
}

/// Everything needed to run one monitoring pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Input device name, or the host default
    pub device: Option<String>,

    pub stream: StreamConfig,

    /// Window applied before the FFT
    pub window: WindowFunction,

    /// Linear amplitude treated as 0 dB
    pub reference_amplitude: f32,

    /// Smallest magnitude fed to the logarithm
    pub min_amplitude: f32,

    /// Noise gate, `None` to disable
    pub gate: Option<NoiseGateConfig>,

    /// Peak hold refresh interval in milliseconds
    pub peak_refresh_ms: u64,

    /// Frames the capture queue holds before dropping samples
    pub buffer_frames: usize,

    /// Consumer polling interval in milliseconds
    pub consumer_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            device: None,
            reference_amplitude: stream.full_scale(),
            stream,
            window: WindowFunction::Rectangular,
            min_amplitude: 15.0,
            gate: Some(NoiseGateConfig::default()),
            peak_refresh_ms: 500,
            buffer_frames: 8,
            consumer_interval_ms: 50,
        }
    }
}

impl MonitorConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: CaptureError| match e {
            CaptureError::Configuration(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        };

        self.stream.validate().map_err(invalid)?;
        if let Some(gate) = &self.gate {
            gate.validate().map_err(invalid)?;
        }
        if !(self.reference_amplitude.is_finite() && self.reference_amplitude > 0.0) {
            return Err(ConfigError::Invalid(
                "reference_amplitude must be positive".into(),
            ));
        }
        if !(self.min_amplitude.is_finite() && self.min_amplitude > 0.0) {
            return Err(ConfigError::Invalid("min_amplitude must be positive".into()));
        }
        if self.min_amplitude >= self.reference_amplitude {
            return Err(ConfigError::Invalid(format!(
                "min_amplitude ({}) must be below reference_amplitude ({})",
                self.min_amplitude, self.reference_amplitude
            )));
        }
        if self.peak_refresh_ms == 0 {
            return Err(ConfigError::Invalid("peak_refresh_ms must be positive".into()));
        }
        if self.buffer_frames == 0 {
            return Err(ConfigError::Invalid("buffer_frames must be at least 1".into()));
        }
        if self.consumer_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "consumer_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn peak_refresh(&self) -> Duration {
        Duration::from_millis(self.peak_refresh_ms)
    }

    pub fn consumer_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_interval_ms)
    }
}
