//! Latest-value handoff between the capture thread and the consumer

use crate::pipeline::PublishedFrame;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<PublishedFrame>>,
    /// Sequence of the last frame handed out by `take_fresh`
    seen: Option<u64>,
    finished: bool,
}

/// Single-slot buffer: a new frame replaces an unread one, nothing queues up
#[derive(Default)]
pub struct LatestSlot {
    state: Mutex<SlotState>,
    updated: Condvar,
}

impl LatestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Ignored once the slot is finished.
    pub fn publish(&self, frame: PublishedFrame) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.latest = Some(Arc::new(frame));
        }
        self.updated.notify_all();
    }

    /// Most recent frame, whether or not it was read before
    pub fn latest(&self) -> Option<Arc<PublishedFrame>> {
        self.state.lock().latest.clone()
    }

    /// Most recent frame if it has not been taken yet
    pub fn take_fresh(&self) -> Option<Arc<PublishedFrame>> {
        let mut state = self.state.lock();
        Self::take_fresh_locked(&mut state)
    }

    /// Wait up to `timeout` for a frame not taken yet.
    ///
    /// Returns `None` on timeout or when the producer finished without a new frame.
    pub fn wait_fresh(&self, timeout: Duration) -> Option<Arc<PublishedFrame>> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = Self::take_fresh_locked(&mut state) {
                return Some(frame);
            }
            if state.finished {
                return None;
            }
            if self.updated.wait_for(&mut state, timeout).timed_out() {
                return Self::take_fresh_locked(&mut state);
            }
        }
    }

    /// Mark the producer as done and wake waiting consumers
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.updated.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn take_fresh_locked(state: &mut SlotState) -> Option<Arc<PublishedFrame>> {
        let frame = state.latest.as_ref()?;
        if state.seen == Some(frame.sequence) {
            return None;
        }
        state.seen = Some(frame.sequence);
        Some(frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PeakState;
    use std::thread;
    use std::time::Instant;

    fn frame(sequence: u64) -> PublishedFrame {
        let now = Instant::now();
        PublishedFrame {
            sequence,
            waveform: vec![0i16; 4].into(),
            spectrum_db: vec![-90.0; 2],
            frequencies: vec![0.0, 1.0].into(),
            peak: PeakState {
                peak_db: -90.0,
                updated_at: now,
            },
            timestamp: now,
            overflowed: false,
        }
    }

    #[test]
    fn empty_slot_has_nothing() {
        let slot = LatestSlot::new();
        assert!(slot.latest().is_none());
        assert!(slot.take_fresh().is_none());
        assert!(!slot.is_finished());
    }

    #[test]
    fn newer_frame_overwrites_unread_one() {
        let slot = LatestSlot::new();
        slot.publish(frame(0));
        slot.publish(frame(1));

        assert_eq!(slot.take_fresh().unwrap().sequence, 1);
        assert!(slot.take_fresh().is_none());
    }

    #[test]
    fn latest_can_be_read_repeatedly() {
        let slot = LatestSlot::new();
        slot.publish(frame(3));

        assert_eq!(slot.take_fresh().unwrap().sequence, 3);
        assert_eq!(slot.latest().unwrap().sequence, 3);
        assert_eq!(slot.latest().unwrap().sequence, 3);
    }

    #[test]
    fn wait_fresh_times_out_without_producer() {
        let slot = LatestSlot::new();
        assert!(slot.wait_fresh(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_fresh_wakes_on_publish() {
        let slot = Arc::new(LatestSlot::new());
        let producer = slot.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.publish(frame(7));
        });

        let got = slot.wait_fresh(Duration::from_secs(5)).unwrap();
        assert_eq!(got.sequence, 7);
        handle.join().unwrap();
    }

    #[test]
    fn finish_wakes_waiters_and_blocks_publish() {
        let slot = Arc::new(LatestSlot::new());
        let producer = slot.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.finish();
        });

        assert!(slot.wait_fresh(Duration::from_secs(5)).is_none());
        handle.join().unwrap();

        slot.publish(frame(1));
        assert!(slot.latest().is_none());
        assert!(slot.is_finished());
    }
}
