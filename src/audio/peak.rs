//! Peak hold refreshed on a wall-clock cadence rather than per frame

use super::LoudnessSpectrum;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Last published peak level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakState {
    pub peak_db: f32,
    pub updated_at: Instant,
}

/// Publishes the loudest bin at most once per refresh window
#[derive(Debug, Clone)]
pub struct PeakTracker {
    state: PeakState,
    refresh_window: Duration,
}

impl PeakTracker {
    /// Start tracking at `floor_db`. The first refresh happens one window after `started_at`.
    pub fn new(floor_db: f32, refresh_window: Duration, started_at: Instant) -> Self {
        Self {
            state: PeakState {
                peak_db: floor_db,
                updated_at: started_at,
            },
            refresh_window,
        }
    }

    pub fn state(&self) -> PeakState {
        self.state
    }

    pub fn update(&mut self, loudness: &LoudnessSpectrum, now: Instant) -> PeakState {
        // Instants earlier than the last refresh saturate to zero and never publish
        if now.saturating_duration_since(self.state.updated_at) < self.refresh_window {
            return self.state;
        }

        if let Some(peak_db) = loudness.max() {
            self.state = PeakState {
                peak_db,
                updated_at: now,
            };
            log::trace!("Peak refreshed: {:.1} dB", peak_db);
        }
        self.state
    }
}
