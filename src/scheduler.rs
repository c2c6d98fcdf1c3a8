//! Capture thread driving the pipeline at the device's cadence

use crate::audio::{AudioFrame, CaptureError, Clock, FrameSource, Interrupter, StreamConfig};
use crate::config::MonitorConfig;
use crate::pipeline::Pipeline;
use crate::state::LatestSlot;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters observable while the scheduler runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames published, including silent substitutes
    pub frames: u64,

    /// Overruns reported by the source
    pub overflows: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    overflows: AtomicU64,
}

/// Owns the capture thread.
///
/// The source is opened, read and closed on that thread; the consumer only
/// touches the [`LatestSlot`].
pub struct FrameScheduler {
    slot: Arc<LatestSlot>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    interrupter: Interrupter,
    stream_config: StreamConfig,
    thread_handle: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    /// Validate `config`, open the source with `open` on a new capture thread
    /// and start pulling frames.
    ///
    /// Returns once the source is open, so device and configuration errors
    /// reach the caller before any frame is processed.
    pub fn start<S, F>(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        open: F,
    ) -> Result<Self, CaptureError>
    where
        S: FrameSource + 'static,
        F: FnOnce(&MonitorConfig) -> Result<S, CaptureError> + Send + 'static,
    {
        config.validate()?;

        let slot = Arc::new(LatestSlot::new());
        let counters = Arc::new(Counters::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let stream_config = config.stream;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Interrupter, CaptureError>>();

        let thread_slot = slot.clone();
        let thread_counters = counters.clone();
        let thread_shutdown = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let (mut source, pipeline) = match open_source(&config, open, clock.as_ref()) {
                    Ok(opened) => opened,
                    Err(e) => {
                        thread_slot.finish();
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(source.interrupter()));

                run_capture_loop(
                    &mut source,
                    pipeline,
                    clock.as_ref(),
                    &thread_slot,
                    &thread_counters,
                    &thread_shutdown,
                );

                source.close();
                thread_slot.finish();
                log::info!("Audio capture thread stopped");
            })
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::ThreadError(
                "capture thread exited during startup".into(),
            ))
        });

        match opened {
            Ok(interrupter) => Ok(Self {
                slot,
                counters,
                shutdown,
                interrupter,
                stream_config,
                thread_handle: Some(thread_handle),
            }),
            Err(e) => {
                let _ = thread_handle.join();
                Err(e)
            }
        }
    }

    /// Where processed frames are published
    pub fn slot(&self) -> Arc<LatestSlot> {
        self.slot.clone()
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            overflows: self.counters.overflows.load(Ordering::Relaxed),
        }
    }

    /// False once the source closed or shutdown completed
    pub fn is_running(&self) -> bool {
        !self.slot.is_finished()
    }

    /// Stop pulling frames, release the device and wait for the capture thread.
    ///
    /// Safe to call while the thread is blocked in a read, and more than once.
    pub fn shutdown(&mut self) {
        if self.thread_handle.is_none() {
            return;
        }
        log::info!("Audio capture stopping");
        self.shutdown.store(true, Ordering::Release);
        self.interrupter.interrupt();
        self.join_thread();
    }

    /// Wait for the source to end on its own
    pub fn join(mut self) -> SchedulerStats {
        self.join_thread();
        self.stats()
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Audio capture thread panicked");
                self.slot.finish();
            }
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_source<S, F>(
    config: &MonitorConfig,
    open: F,
    clock: &dyn Clock,
) -> Result<(S, Pipeline), CaptureError>
where
    S: FrameSource,
    F: FnOnce(&MonitorConfig) -> Result<S, CaptureError>,
{
    let mut source = open(config)?;

    // The frequency axis is derived from the requested config, so the source must match it
    if source.config() != &config.stream {
        let actual = *source.config();
        source.close();
        return Err(CaptureError::Configuration(format!(
            "source opened with {actual:?}, expected {:?}",
            config.stream
        )));
    }

    match Pipeline::new(config, clock.now()) {
        Ok(pipeline) => Ok((source, pipeline)),
        Err(e) => {
            source.close();
            Err(e)
        }
    }
}

fn run_capture_loop<S: FrameSource>(
    source: &mut S,
    mut pipeline: Pipeline,
    clock: &dyn Clock,
    slot: &LatestSlot,
    counters: &Counters,
    shutdown: &AtomicBool,
) {
    let frame_size = pipeline.stream_config().frame_size;

    while !shutdown.load(Ordering::Acquire) {
        let (frame, overflowed) = match source.read_frame() {
            Ok(frame) => (frame, false),
            Err(e) if e.is_recoverable() => {
                let total = counters.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("{} ({} so far), publishing silence", e, total);
                (AudioFrame::silence(frame_size), true)
            }
            Err(CaptureError::StreamClosed) => {
                log::info!("Audio stream closed");
                break;
            }
            Err(e) => {
                log::error!("Audio capture error: {}", e);
                break;
            }
        };

        // A read interrupted by shutdown may still have returned data
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if frame.len() != frame_size {
            log::trace!("Frame of {} samples, expected {}", frame.len(), frame_size);
        }

        let published = pipeline.process(frame, clock.now(), overflowed);
        counters.frames.fetch_add(1, Ordering::Relaxed);
        slot.publish(published);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureBuffer, ManualClock, SystemClock};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const FRAME: usize = 256;

    fn config() -> MonitorConfig {
        MonitorConfig {
            stream: StreamConfig {
                frame_size: FRAME,
                ..Default::default()
            },
            gate: None,
            ..Default::default()
        }
    }

    fn loud_frame() -> Vec<i16> {
        vec![20000; FRAME]
    }

    /// Replays a fixed list of reads, then reports the stream closed
    struct ScriptedSource {
        config: StreamConfig,
        script: VecDeque<Result<Vec<i16>, CaptureError>>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<i16>, CaptureError>>, closes: Arc<AtomicUsize>) -> Self {
            Self {
                config: config().stream,
                script: script.into(),
                closes,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn config(&self) -> &StreamConfig {
            &self.config
        }

        fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
            match self.script.pop_front() {
                Some(step) => step.map(AudioFrame::new),
                None => Err(CaptureError::StreamClosed),
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn interrupter(&self) -> Interrupter {
            Interrupter::new(|| {})
        }
    }

    /// Blocks in every read until interrupted, like an idle microphone
    struct IdleSource {
        config: StreamConfig,
        buffer: Arc<CaptureBuffer>,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for IdleSource {
        fn config(&self) -> &StreamConfig {
            &self.config
        }

        fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
            self.buffer.pop_frame(self.config.frame_size).map(AudioFrame::new)
        }

        fn close(&mut self) {
            self.buffer.close();
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn interrupter(&self) -> Interrupter {
            Interrupter::for_buffer(self.buffer.clone())
        }
    }

    fn start_scripted(
        script: Vec<Result<Vec<i16>, CaptureError>>,
    ) -> (FrameScheduler, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source_closes = closes.clone();
        let scheduler = FrameScheduler::start(config(), Arc::new(ManualClock::default()), move |_| {
            Ok(ScriptedSource::new(script, source_closes))
        })
        .unwrap();
        (scheduler, closes)
    }

    #[test]
    fn overflow_publishes_silence() {
        let (scheduler, closes) = start_scripted(vec![
            Ok(loud_frame()),
            Err(CaptureError::ReadOverflow { dropped: 128 }),
        ]);
        let slot = scheduler.slot();
        let stats = scheduler.join();

        let last = slot.latest().unwrap();
        assert_eq!(last.sequence, 1);
        assert!(last.overflowed);
        assert!(last.waveform.iter().all(|&s| s == 0));
        let floor = 20.0 * (15.0f32 / 32767.0).log10();
        assert!(last.spectrum_db.iter().all(|&db| (db - floor).abs() < 1e-4));

        assert_eq!(
            stats,
            SchedulerStats {
                frames: 2,
                overflows: 1
            }
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pipeline_continues_after_overflow() {
        let (scheduler, _closes) = start_scripted(vec![
            Err(CaptureError::ReadOverflow { dropped: 64 }),
            Ok(loud_frame()),
            Ok(loud_frame()),
        ]);
        let slot = scheduler.slot();
        let stats = scheduler.join();

        let last = slot.latest().unwrap();
        assert_eq!(last.sequence, 2);
        assert!(!last.overflowed);
        assert_eq!(last.waveform.len(), FRAME);
        assert!(last.waveform.iter().all(|&s| s == 20000));
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.overflows, 1);
    }

    #[test]
    fn stream_closed_finishes_slot_and_closes_once() {
        let (scheduler, closes) = start_scripted(vec![]);
        let slot = scheduler.slot();
        let stats = scheduler.join();

        assert!(slot.is_finished());
        assert!(slot.latest().is_none());
        assert_eq!(stats.frames, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_interrupts_blocked_read() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source_closes = closes.clone();
        let mut scheduler = FrameScheduler::start(config(), Arc::new(SystemClock), move |cfg| {
            Ok(IdleSource {
                config: cfg.stream,
                buffer: Arc::new(CaptureBuffer::new(cfg.stream.frame_size * 2)),
                closes: source_closes,
            })
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.is_running());

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(!scheduler.is_running());
        drop(scheduler);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_is_reported_before_capture() {
        let result = FrameScheduler::start(
            config(),
            Arc::new(SystemClock),
            |_| -> Result<ScriptedSource, CaptureError> {
                Err(CaptureError::DeviceUnavailable("no microphone".into()))
            },
        );

        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }

    #[test]
    fn invalid_config_never_opens_device() {
        let opened = Arc::new(AtomicBool::new(false));
        let flag = opened.clone();
        let bad = MonitorConfig {
            stream: StreamConfig {
                frame_size: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let result = FrameScheduler::start(bad, Arc::new(SystemClock), move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(ScriptedSource::new(vec![], Arc::new(AtomicUsize::new(0))))
        });

        assert!(matches!(result, Err(CaptureError::Configuration(_))));
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[test]
    fn mismatched_source_config_is_rejected_and_closed() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source_closes = closes.clone();

        let result = FrameScheduler::start(config(), Arc::new(SystemClock), move |_| {
            let mut source = ScriptedSource::new(vec![], source_closes);
            source.config.sample_rate = 44100;
            Ok(source)
        });

        assert!(matches!(result, Err(CaptureError::Configuration(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn published_frames_carry_stream_frequency_axis() {
        let (scheduler, _closes) = start_scripted(vec![Ok(loud_frame())]);
        let slot = scheduler.slot();
        scheduler.join();

        let frame = slot.latest().unwrap();
        assert_eq!(frame.frequencies.len(), FRAME / 2);
        assert_eq!(frame.spectrum_db.len(), FRAME / 2);
        assert_eq!(frame.frequencies[1], 48000.0 / FRAME as f32);
    }
}
