//! Offline white-noise generator for exercising the pipeline without a device

use rand::Rng;

/// Full-range uniform noise lasting `duration_secs` at `sample_rate`.
///
/// Non-positive or non-finite durations yield an empty signal.
pub fn generate(duration_secs: f32, sample_rate: u32) -> Vec<i16> {
    generate_with_rng(duration_secs, sample_rate, &mut rand::rng())
}

/// Same as [`generate`] with a caller-supplied generator, for reproducible signals.
pub fn generate_with_rng<R: Rng>(
    duration_secs: f32,
    sample_rate: u32,
    rng: &mut R,
) -> Vec<i16> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Vec::new();
    }
    let count = (duration_secs as f64 * sample_rate as f64).round() as usize;
    (0..count).map(|_| rng.random::<i16>()).collect()
}
