//! Audio capture and analysis module

mod capture;
mod fft;
mod level;
pub mod noise;
mod peak;
mod sources;

pub use capture::{CaptureBuffer, CpalCaptureSource, FrameSource, Interrupter};
pub use fft::{FrequencyAxis, SpectralAnalyzer, Spectrum, WindowFunction};
pub use level::{LevelConverter, LoudnessSpectrum, NoiseGate, NoiseGateConfig};
pub use peak::{Clock, ManualClock, PeakState, PeakTracker, SystemClock};
pub use sources::{find_input_device, list_input_devices, InputDevice, SourceError};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Audio capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The input device could not be opened. Fatal, reported before capture starts.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device dropped samples because nobody read them in time.
    #[error("Input overflowed: {dropped} samples dropped")]
    ReadOverflow { dropped: usize },

    /// The stream ended, either by request or because the device went away.
    #[error("Audio stream closed")]
    StreamClosed,

    #[error("Invalid capture configuration: {0}")]
    Configuration(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl CaptureError {
    /// Errors the scheduler papers over with a silent frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::ReadOverflow { .. })
    }
}

/// Capture parameters, fixed for the life of an open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (mono only)
    pub channels: u16,

    /// Bits per sample (signed 16-bit only)
    pub bit_depth: u16,

    /// Samples per read
    pub frame_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            bit_depth: 16,
            frame_size: 1024,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::Configuration(
                "sample rate must be positive".into(),
            ));
        }
        if self.channels != 1 {
            return Err(CaptureError::Configuration(format!(
                "unsupported channel count: {} (mono only)",
                self.channels
            )));
        }
        if self.bit_depth != 16 {
            return Err(CaptureError::Configuration(format!(
                "unsupported bit depth: {}",
                self.bit_depth
            )));
        }
        // One sample would leave no positive-frequency bin
        if self.frame_size < 2 {
            return Err(CaptureError::Configuration(format!(
                "frame size must be at least 2 samples, got {}",
                self.frame_size
            )));
        }
        Ok(())
    }

    /// Number of positive-frequency bins produced per frame (Nyquist excluded)
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }

    /// Largest positive sample value for the configured bit depth
    pub fn full_scale(&self) -> f32 {
        ((1u32 << (self.bit_depth - 1)) - 1) as f32
    }
}

/// One block of consecutively captured mono samples.
///
/// Cheap to clone; the samples are never mutated after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Zero-filled frame substituted for a cycle lost to overflow
    pub fn silence(frame_size: usize) -> Self {
        Self::new(vec![0; frame_size])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn shared_samples(&self) -> Arc<[i16]> {
        self.samples.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
