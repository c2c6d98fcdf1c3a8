//! FFT analysis: time-domain frame to positive-frequency magnitude spectrum

use super::{AudioFrame, StreamConfig};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Analysis window applied before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    #[default]
    Rectangular,
    Hann,
}

impl WindowFunction {
    fn coefficients(self, size: usize) -> Vec<f32> {
        match self {
            WindowFunction::Rectangular => vec![1.0; size],
            WindowFunction::Hann if size < 2 => vec![1.0; size],
            WindowFunction::Hann => (0..size)
                .map(|i| {
                    0.5 * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
                })
                .collect(),
        }
    }
}

/// Frequency in Hz of every spectrum bin.
///
/// Derived once from the stream config and shared by every spectrum of that stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyAxis {
    bins: Arc<[f32]>,
}

impl FrequencyAxis {
    pub fn new(config: &StreamConfig) -> Self {
        let resolution = config.sample_rate as f32 / config.frame_size as f32;
        let bins: Vec<f32> = (0..config.bin_count())
            .map(|k| k as f32 * resolution)
            .collect();
        Self { bins: bins.into() }
    }

    pub fn shared(&self) -> Arc<[f32]> {
        self.bins.clone()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Frequency of bin `k`, if it exists
    pub fn frequency(&self, k: usize) -> Option<f32> {
        self.bins.get(k).copied()
    }
}

/// Linear magnitudes of the positive-frequency half of one frame, in sample units
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    magnitudes: Vec<f32>,
}

impl Spectrum {
    pub fn new(magnitudes: Vec<f32>) -> Self {
        Self { magnitudes }
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Index of the strongest bin
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| k)
    }
}

/// FFT analyzer for a fixed stream configuration
pub struct SpectralAnalyzer {
    config: StreamConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    axis: FrequencyAxis,

    // Reused between frames
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,

    // Single-sided amplitude scaling (DC, everything else)
    dc_scale: f32,
    bin_scale: f32,
}

impl SpectralAnalyzer {
    /// Create new analyzer. `config` is assumed to be validated.
    pub fn new(config: StreamConfig, window: WindowFunction) -> Self {
        let fft_size = config.frame_size;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let window = window.coefficients(fft_size);

        // Normalise by the window sum so a bin-centred sine reads its own amplitude
        let gain: f32 = window.iter().sum::<f32>().max(f32::EPSILON);

        log::debug!(
            "Spectral analyzer: {} point FFT at {} Hz ({:.2} Hz per bin)",
            fft_size,
            config.sample_rate,
            config.sample_rate as f32 / fft_size as f32
        );

        Self {
            config,
            scratch: vec![Complex::default(); fft.get_inplace_scratch_len()],
            buffer: vec![Complex::default(); fft_size],
            fft,
            window,
            axis: FrequencyAxis::new(&config),
            dc_scale: 1.0 / gain,
            bin_scale: 2.0 / gain,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn frequency_axis(&self) -> &FrequencyAxis {
        &self.axis
    }

    /// Transform one frame into its magnitude spectrum.
    ///
    /// Frames shorter than the configured size are zero-padded, longer ones truncated.
    pub fn analyze(&mut self, frame: &AudioFrame) -> Spectrum {
        let samples = frame.samples();
        for (i, (slot, &w)) in self.buffer.iter_mut().zip(self.window.iter()).enumerate() {
            let s = samples.get(i).copied().unwrap_or(0) as f32;
            *slot = Complex::new(s * w, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let magnitudes = self
            .buffer
            .iter()
            .take(self.config.bin_count())
            .enumerate()
            .map(|(k, c)| {
                let scale = if k == 0 { self.dc_scale } else { self.bin_scale };
                c.norm() * scale
            })
            .collect();

        Spectrum::new(magnitudes)
    }
}
