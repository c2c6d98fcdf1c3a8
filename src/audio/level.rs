//! Linear magnitude to decibels, and the noise gate applied on top

use super::{CaptureError, Spectrum};
use serde::{Deserialize, Serialize};

/// Loudness per bin in dB relative to the reference amplitude
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessSpectrum {
    values: Vec<f32>,
}

impl LoudnessSpectrum {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Loudest bin, `None` for an empty spectrum
    pub fn max(&self) -> Option<f32> {
        self.values.iter().copied().reduce(f32::max)
    }
}

/// Maps linear magnitudes onto a dB scale with a floor on the input amplitude
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelConverter {
    reference_amplitude: f32,
    min_amplitude: f32,
}

impl LevelConverter {
    pub fn new(reference_amplitude: f32, min_amplitude: f32) -> Result<Self, CaptureError> {
        if !(reference_amplitude.is_finite() && reference_amplitude > 0.0) {
            return Err(CaptureError::Configuration(format!(
                "reference amplitude must be positive, got {reference_amplitude}"
            )));
        }
        if !(min_amplitude.is_finite() && min_amplitude > 0.0) {
            return Err(CaptureError::Configuration(format!(
                "minimum amplitude must be positive, got {min_amplitude}"
            )));
        }
        // Otherwise every bin clamps to 0 dB
        if min_amplitude >= reference_amplitude {
            return Err(CaptureError::Configuration(format!(
                "minimum amplitude {min_amplitude} must be below reference {reference_amplitude}"
            )));
        }
        Ok(Self {
            reference_amplitude,
            min_amplitude,
        })
    }

    /// Lowest value `to_db` can return
    pub fn floor_db(&self) -> f32 {
        self.level_db(0.0)
    }

    /// dB value of a single magnitude. Never NaN, never above 0 dB.
    pub fn level_db(&self, magnitude: f32) -> f32 {
        // NaN fails the comparison inside f32::max and falls back to the floor
        let clamped = magnitude.max(self.min_amplitude);
        let db = 20.0 * (clamped / self.reference_amplitude).log10();
        db.min(0.0)
    }

    pub fn to_db(&self, spectrum: &Spectrum) -> LoudnessSpectrum {
        LoudnessSpectrum::new(
            spectrum
                .magnitudes()
                .iter()
                .map(|&m| self.level_db(m))
                .collect(),
        )
    }
}

/// Noise gate thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseGateConfig {
    /// Bins below this level are silenced
    pub threshold_db: f32,

    /// Value silenced bins are set to
    pub floor_db: f32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            threshold_db: -60.0,
            floor_db: -90.0,
        }
    }
}

impl NoiseGateConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if !self.threshold_db.is_finite() || !self.floor_db.is_finite() {
            return Err(CaptureError::Configuration(
                "noise gate levels must be finite".into(),
            ));
        }
        if self.floor_db > self.threshold_db {
            return Err(CaptureError::Configuration(format!(
                "noise gate floor ({} dB) above threshold ({} dB)",
                self.floor_db, self.threshold_db
            )));
        }
        Ok(())
    }
}

/// Forces sub-threshold bins down to a fixed floor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseGate {
    config: NoiseGateConfig,
}

impl NoiseGate {
    pub fn new(config: NoiseGateConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NoiseGateConfig {
        &self.config
    }

    pub fn apply(&self, loudness: LoudnessSpectrum) -> LoudnessSpectrum {
        let mut values = loudness.into_values();
        for value in &mut values {
            if *value < self.config.threshold_db {
                *value = self.config.floor_db;
            }
        }
        LoudnessSpectrum::new(values)
    }
}
