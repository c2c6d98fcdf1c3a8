//! Per-frame processing: spectrum, loudness, gate, peak hold

use crate::audio::{
    AudioFrame, CaptureError, LevelConverter, NoiseGate, PeakState, PeakTracker,
    SpectralAnalyzer, StreamConfig,
};
use crate::config::MonitorConfig;
use std::sync::Arc;
use std::time::Instant;

/// One processed frame as handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFrame {
    /// Capture cycle number, starting at 0
    pub sequence: u64,

    /// Raw samples of the frame (zero-filled after an overflow)
    pub waveform: Arc<[i16]>,

    /// Gated loudness per bin in dB
    pub spectrum_db: Vec<f32>,

    /// Frequency of each entry of `spectrum_db`; shared for the whole stream
    pub frequencies: Arc<[f32]>,

    pub peak: PeakState,

    /// When the frame finished processing
    pub timestamp: Instant,

    /// The frame replaced samples lost to an overrun
    pub overflowed: bool,
}

impl PublishedFrame {
    /// Frequency and level of the loudest bin
    pub fn dominant(&self) -> Option<(f32, f32)> {
        self.spectrum_db
            .iter()
            .zip(self.frequencies.iter())
            .max_by(|a, b| a.0.partial_cmp(b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(&db, &hz)| (hz, db))
    }
}

/// The non-blocking stages, owned by a single producer
pub struct Pipeline {
    analyzer: SpectralAnalyzer,
    converter: LevelConverter,
    gate: Option<NoiseGate>,
    peak: PeakTracker,
    sequence: u64,
}

impl Pipeline {
    pub fn new(config: &MonitorConfig, started_at: Instant) -> Result<Self, CaptureError> {
        config.validate()?;

        let converter = LevelConverter::new(config.reference_amplitude, config.min_amplitude)?;
        let gate = config.gate.map(NoiseGate::new).transpose()?;

        // Start the hold at the quietest value the chain can produce
        let floor_db = match &gate {
            Some(g) => g.config().floor_db.min(converter.floor_db()),
            None => converter.floor_db(),
        };

        Ok(Self {
            analyzer: SpectralAnalyzer::new(config.stream, config.window),
            converter,
            gate,
            peak: PeakTracker::new(floor_db, config.peak_refresh(), started_at),
            sequence: 0,
        })
    }

    pub fn stream_config(&self) -> &StreamConfig {
        self.analyzer.config()
    }

    pub fn peak(&self) -> PeakState {
        self.peak.state()
    }

    pub fn process(&mut self, frame: AudioFrame, now: Instant, overflowed: bool) -> PublishedFrame {
        let spectrum = self.analyzer.analyze(&frame);
        let mut loudness = self.converter.to_db(&spectrum);
        if let Some(gate) = &self.gate {
            loudness = gate.apply(loudness);
        }
        let peak = self.peak.update(&loudness, now);

        let sequence = self.sequence;
        self.sequence += 1;

        PublishedFrame {
            sequence,
            waveform: frame.shared_samples(),
            spectrum_db: loudness.into_values(),
            frequencies: self.analyzer.frequency_axis().shared(),
            peak,
            timestamp: now,
            overflowed,
        }
    }
}
