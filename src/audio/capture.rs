//! Audio capture: a blocking frame reader over a cpal input stream

use super::sources::find_input_device;
use super::{AudioFrame, CaptureError, StreamConfig};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SupportedBufferSize, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Anything that yields fixed-size mono frames on demand.
///
/// `read_frame` may block; everything else must not.
pub trait FrameSource {
    /// The parameters the source was opened with
    fn config(&self) -> &StreamConfig;

    /// Block until a full frame is available.
    ///
    /// Returns `ReadOverflow` once per overrun and `StreamClosed` after
    /// `close` or an interrupt.
    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);

    /// Handle that unblocks a pending `read_frame` from another thread
    fn interrupter(&self) -> Interrupter;
}

/// Wakes a blocked reader from another thread
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Interrupter that closes `buffer`, failing pending and future reads with `StreamClosed`
    pub fn for_buffer(buffer: Arc<CaptureBuffer>) -> Self {
        Self::new(move || buffer.close())
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

struct BufferState {
    samples: VecDeque<i16>,
    capacity: usize,
    dropped: usize,
    closed: bool,
}

/// Bounded sample queue between the device callback and the frame reader.
///
/// Overflow drops the oldest samples and is reported to the next reader.
pub struct CaptureBuffer {
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn push_samples(&self, data: &[i16]) {
        {
            let mut state = self.state.lock();
            if state.closed || state.capacity == 0 {
                return;
            }

            // Only the tail fits if one push exceeds the whole capacity
            let capacity = state.capacity;
            let data = if data.len() > capacity {
                state.dropped += data.len() - capacity;
                &data[data.len() - capacity..]
            } else {
                data
            };

            let overflow = (state.samples.len() + data.len()).saturating_sub(capacity);
            if overflow > 0 {
                state.samples.drain(..overflow);
                state.dropped += overflow;
            }
            state.samples.extend(data.iter().copied());
        }
        self.ready.notify_all();
    }

    /// Block until `frame_size` samples are queued, an overrun is pending, or the buffer closes
    pub fn pop_frame(&self, frame_size: usize) -> Result<Vec<i16>, CaptureError> {
        let mut state = self.state.lock();
        if frame_size > state.capacity {
            return Err(CaptureError::Configuration(format!(
                "frame of {} samples exceeds buffer capacity {}",
                frame_size, state.capacity
            )));
        }

        loop {
            if state.closed {
                return Err(CaptureError::StreamClosed);
            }
            if state.dropped > 0 {
                let dropped = std::mem::take(&mut state.dropped);
                return Err(CaptureError::ReadOverflow { dropped });
            }
            if state.samples.len() >= frame_size {
                return Ok(state.samples.drain(..frame_size).collect());
            }
            self.ready.wait(&mut state);
        }
    }

    /// Stop accepting samples and wake every waiting reader
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.samples.clear();
        }
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Samples currently queued
    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Microphone input opened through cpal.
///
/// The cpal stream is not `Send`, so open and read from the same thread.
pub struct CpalCaptureSource {
    config: StreamConfig,
    device_name: String,
    stream: Option<cpal::Stream>,
    buffer: Arc<CaptureBuffer>,
}

impl CpalCaptureSource {
    /// Open the named input device (host default for `None`) and start capturing.
    ///
    /// `buffer_frames` is how many frames may queue up before the oldest are dropped.
    pub fn open(
        config: StreamConfig,
        device_name: Option<&str>,
        buffer_frames: usize,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        if buffer_frames == 0 {
            return Err(CaptureError::Configuration(
                "capture buffer must hold at least one frame".into(),
            ));
        }

        let device = find_input_device(device_name)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = select_input_config(&device, &config)?;
        let device_channels = supported.channels();
        let buffer_size = fixed_buffer_size(supported.buffer_size(), config.frame_size)?;

        let stream_config = cpal::StreamConfig {
            channels: device_channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size,
        };

        let buffer = Arc::new(CaptureBuffer::new(config.frame_size * buffer_frames));
        let channels = device_channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, buffer.clone(), channels)
            }
            SampleFormat::I32 => {
                build_stream::<i32>(&device, &stream_config, buffer.clone(), channels)
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, buffer.clone(), channels)
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, buffer.clone(), channels)
            }
            other => {
                return Err(CaptureError::Configuration(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        log::info!(
            "Capture started on '{}': {} Hz, {} device channel(s), {} samples ({:?}) per frame",
            name,
            config.sample_rate,
            device_channels,
            config.frame_size,
            config.frame_duration()
        );

        Ok(Self {
            config,
            device_name: name,
            stream: Some(stream),
            buffer,
        })
    }

}

impl FrameSource for CpalCaptureSource {
    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::StreamClosed);
        }
        self.buffer
            .pop_frame(self.config.frame_size)
            .map(AudioFrame::new)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.buffer.close();
            drop(stream);
            log::info!("Audio capture on '{}' closed", self.device_name);
        }
    }

    fn interrupter(&self) -> Interrupter {
        Interrupter::for_buffer(self.buffer.clone())
    }
}

impl Drop for CpalCaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sample formats `open` can build a stream for
const CAPTURE_FORMATS: [SampleFormat; 4] = [
    SampleFormat::I16,
    SampleFormat::I32,
    SampleFormat::F32,
    SampleFormat::U16,
];

fn select_input_config(
    device: &Device,
    config: &StreamConfig,
) -> Result<SupportedStreamConfig, CaptureError> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    choose_input_config(ranges, config.sample_rate).ok_or_else(|| {
        CaptureError::Configuration(format!(
            "device has no {} Hz input in a supported sample format",
            config.sample_rate
        ))
    })
}

/// Pick a config that can run at `sample_rate` in a format we can read,
/// preferring fewer channels and then i16
fn choose_input_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    let rate = cpal::SampleRate(sample_rate);
    ranges
        .filter(|r| CAPTURE_FORMATS.contains(&r.sample_format()))
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .min_by_key(|r| (r.channels(), r.sample_format() != SampleFormat::I16))
        .map(|r| r.with_sample_rate(rate))
}

/// Request one frame per device callback when the device says it can do that
fn fixed_buffer_size(
    supported: &SupportedBufferSize,
    frame_size: usize,
) -> Result<BufferSize, CaptureError> {
    match supported {
        SupportedBufferSize::Range { min, max } => {
            let wanted = u32::try_from(frame_size).map_err(|_| {
                CaptureError::Configuration(format!("frame size {frame_size} too large"))
            })?;
            if wanted < *min || wanted > *max {
                return Err(CaptureError::Configuration(format!(
                    "frame size {frame_size} outside device buffer range {min}..={max}"
                )));
            }
            Ok(BufferSize::Fixed(wanted))
        }
        SupportedBufferSize::Unknown => Ok(BufferSize::Default),
    }
}

/// Convert interleaved device samples to mono i16 by averaging channels
fn downmix<T>(data: &[T], channels: usize) -> Vec<i16>
where
    T: cpal::Sample,
    i16: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame
                .iter()
                .map(|&s| <i16 as cpal::Sample>::from_sample(s) as i32)
                .sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Build audio stream for given sample type
fn build_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    buffer: Arc<CaptureBuffer>,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let error_buffer = buffer.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            buffer.push_samples(&downmix(data, channels));
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("Audio device disconnected");
                error_buffer.close();
            }
            other => log::error!("Audio stream error: {}", other),
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pop_frame_returns_samples_in_order() {
        let buffer = CaptureBuffer::new(8);
        buffer.push_samples(&[1, 2, 3, 4, 5]);

        assert_eq!(buffer.pop_frame(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn overflow_drops_oldest_and_reports_once() {
        let buffer = CaptureBuffer::new(4);
        buffer.push_samples(&[1, 2, 3]);
        buffer.push_samples(&[4, 5, 6]);

        assert_eq!(
            buffer.pop_frame(4),
            Err(CaptureError::ReadOverflow { dropped: 2 })
        );
        assert_eq!(buffer.pop_frame(4).unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_push_keeps_tail() {
        let buffer = CaptureBuffer::new(3);
        buffer.push_samples(&[1, 2, 3, 4, 5]);

        assert_eq!(
            buffer.pop_frame(3),
            Err(CaptureError::ReadOverflow { dropped: 2 })
        );
        assert_eq!(buffer.pop_frame(3).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn frame_larger_than_capacity_is_config_error() {
        let buffer = CaptureBuffer::new(4);
        assert!(matches!(
            buffer.pop_frame(8),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn pop_frame_blocks_until_enough_samples() {
        let buffer = Arc::new(CaptureBuffer::new(16));
        let writer = buffer.clone();

        let handle = thread::spawn(move || {
            for chunk in [[1i16, 2], [3, 4], [5, 6]] {
                thread::sleep(Duration::from_millis(5));
                writer.push_samples(&chunk);
            }
        });

        assert_eq!(buffer.pop_frame(6).unwrap(), vec![1, 2, 3, 4, 5, 6]);
        handle.join().unwrap();
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let buffer = Arc::new(CaptureBuffer::new(16));
        let interrupter = Interrupter::for_buffer(buffer.clone());

        let reader = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.pop_frame(8))
        };
        thread::sleep(Duration::from_millis(20));
        interrupter.interrupt();

        assert_eq!(reader.join().unwrap(), Err(CaptureError::StreamClosed));
        assert!(buffer.is_closed());
    }

    #[test]
    fn closed_buffer_ignores_pushes() {
        let buffer = CaptureBuffer::new(8);
        buffer.close();
        buffer.push_samples(&[1, 2, 3]);

        assert!(buffer.is_empty());
        assert_eq!(buffer.pop_frame(2), Err(CaptureError::StreamClosed));
    }

    #[test]
    fn downmix_averages_interleaved_channels() {
        let stereo: [i16; 6] = [100, 300, -200, -400, 7, 9];
        assert_eq!(downmix(&stereo, 2), vec![200, -300, 8]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn downmix_converts_float_samples() {
        let mono = downmix(&[0.0f32, 0.5, -1.0], 1);
        assert_eq!(mono[0], 0);
        assert!((mono[1] - 16384).abs() <= 1);
        assert_eq!(mono[2], -32768);
    }

    #[test]
    fn buffer_size_must_fit_device_range() {
        let range = SupportedBufferSize::Range { min: 64, max: 512 };

        assert_eq!(fixed_buffer_size(&range, 256), Ok(BufferSize::Fixed(256)));
        assert!(matches!(
            fixed_buffer_size(&range, 1024),
            Err(CaptureError::Configuration(_))
        ));
        assert_eq!(
            fixed_buffer_size(&SupportedBufferSize::Unknown, 1024),
            Ok(BufferSize::Default)
        );
    }

    fn range(channels: u16, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(8000),
            cpal::SampleRate(96000),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn config_selection_skips_unreadable_formats() {
        let ranges = vec![range(2, SampleFormat::I16), range(1, SampleFormat::I64)];

        let chosen = choose_input_config(ranges.into_iter(), 48000).unwrap();
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_format(), SampleFormat::I16);
        assert_eq!(chosen.sample_rate(), cpal::SampleRate(48000));
    }

    #[test]
    fn config_selection_prefers_mono_then_i16() {
        let ranges = vec![
            range(2, SampleFormat::I16),
            range(1, SampleFormat::F32),
            range(1, SampleFormat::I16),
        ];
        let chosen = choose_input_config(ranges.into_iter(), 44100).unwrap();
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_format(), SampleFormat::I16);

        let ranges = vec![range(2, SampleFormat::I16), range(1, SampleFormat::I32)];
        let chosen = choose_input_config(ranges.into_iter(), 44100).unwrap();
        assert_eq!(chosen.sample_format(), SampleFormat::I32);
    }

    #[test]
    fn config_selection_needs_matching_rate_and_format() {
        let unreadable = vec![range(1, SampleFormat::U8)];
        assert!(choose_input_config(unreadable.into_iter(), 48000).is_none());

        let too_fast = vec![range(1, SampleFormat::I16)];
        assert!(choose_input_config(too_fast.into_iter(), 192000).is_none());
    }

    #[test]
    fn downmix_converts_i32_samples() {
        let mono = downmix(&[i32::MAX, 0, i32::MIN], 1);
        assert_eq!(mono, vec![i16::MAX, 0, i16::MIN]);
    }
}
