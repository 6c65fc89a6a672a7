//! Output sink abstraction.
//!
//! The decode worker pushes [`PcmBuffer`]s into an [`OutputSink`]; a backend
//! decides what actually drains them:
//! - [`CpalBackend`](crate::device::CpalBackend) feeds a real output device
//! - [`VirtualBackend`] drains on a wall clock (headless playback and tests)
//!
//! Both are built on [`QueueSink`], a [`PcmQueue`] plus a pause flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::bytes_for_seconds;
use crate::error::{DeviceError, SinkError};
use crate::queue::PcmQueue;

/// Negotiated PCM format of an output device. Samples are always signed 16-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Playback time represented by `bytes` of audio in this format.
    pub fn secs_for_bytes(&self, bytes: usize) -> f64 {
        match self.bytes_per_second() {
            0 => 0.0,
            bps => bytes as f64 / bps as f64,
        }
    }
}

/// What the session asks a backend for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputRequest {
    /// Preferred format (the source's native rate and channel count).
    pub format: OutputFormat,
    /// Hard cap on queued audio, in seconds of the negotiated format.
    pub capacity_seconds: f32,
}

/// Interleaved signed 16-bit samples ready for the output device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcmBuffer {
    samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Scale every sample by `volume`. Volumes at or above 0.99 are left as unity gain.
    pub fn apply_volume(&mut self, volume: f32) {
        if volume >= 0.99 {
            return;
        }
        let gain = volume.clamp(0.0, 1.0);
        for s in &mut self.samples {
            *s = (*s as f32 * gain).round() as i16;
        }
    }

    pub fn extend(&mut self, other: PcmBuffer) {
        self.samples.extend(other.samples);
    }
}

/// Consumer side of the pipeline: accepts PCM and plays it at device pace.
pub trait OutputSink: Send + Sync {
    /// Format the device actually runs at.
    fn format(&self) -> OutputFormat;

    /// Queue audio for playback. Ownership of the buffer moves into the sink.
    fn push(&self, pcm: PcmBuffer) -> Result<(), SinkError>;

    /// Bytes queued but not yet played.
    fn queued_bytes(&self) -> usize;

    /// Drop all queued audio.
    fn flush(&self);

    /// While paused the device plays silence and does not consume queued audio.
    fn set_paused(&self, paused: bool);

    /// Reject further pushes. Idempotent.
    fn close(&self);

    /// Number of times the device ran dry while playing.
    fn underrun_events(&self) -> u64 {
        0
    }
}

/// An opened output device. Dropping it releases the device.
pub trait OutputDevice {
    fn sink(&self) -> Arc<dyn OutputSink>;
}

/// Factory for output devices.
pub trait OutputBackend {
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputDevice>, DeviceError>;
}

/// Queue-backed sink shared between the worker and a draining device.
///
/// Starts paused; the session un-pauses it when playback begins.
pub struct QueueSink {
    format: OutputFormat,
    queue: PcmQueue,
    paused: AtomicBool,
    underruns: AtomicU64,
}

impl QueueSink {
    pub fn new(format: OutputFormat, capacity_seconds: f32) -> Self {
        let capacity = bytes_for_seconds(format.sample_rate, format.channels, capacity_seconds);
        Self {
            format,
            queue: PcmQueue::new(format.channels as usize, capacity),
            paused: AtomicBool::new(true),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub(crate) fn queue(&self) -> &PcmQueue {
        &self.queue
    }

    pub(crate) fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
}

impl OutputSink for QueueSink {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn push(&self, pcm: PcmBuffer) -> Result<(), SinkError> {
        self.queue.push(pcm.samples())
    }

    fn queued_bytes(&self) -> usize {
        self.queue.len_bytes()
    }

    fn flush(&self) {
        self.queue.clear();
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn close(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.queue.close();
    }

    fn underrun_events(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Backend whose devices drain their queue on the wall clock instead of real hardware.
///
/// `speed` scales the drain rate (2.0 plays twice as fast as real time).
#[derive(Clone, Debug)]
pub struct VirtualBackend {
    format: Option<OutputFormat>,
    speed: f64,
    available: bool,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self {
            format: None,
            speed: 1.0,
            available: true,
        }
    }
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the negotiated format regardless of what is requested.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            1.0
        };
        self
    }

    /// A backend with no devices; every `open` fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }
}

impl OutputBackend for VirtualBackend {
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputDevice>, DeviceError> {
        if !self.available {
            return Err(DeviceError::NoDevice);
        }
        let format = self.format.unwrap_or(request.format);
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(DeviceError::NoConfig(format!(
                "{} Hz / {} ch",
                format.sample_rate, format.channels
            )));
        }
        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            speed = self.speed,
            "virtual output opened"
        );
        let sink = Arc::new(VirtualSink {
            inner: QueueSink::new(format, request.capacity_seconds),
            speed: self.speed,
            clock: Mutex::new(DrainClock {
                last: Instant::now(),
                carry: 0.0,
            }),
        });
        Ok(Box::new(VirtualDevice { sink }))
    }
}

struct VirtualDevice {
    sink: Arc<VirtualSink>,
}

impl OutputDevice for VirtualDevice {
    fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }
}

struct DrainClock {
    last: Instant,
    /// Fractional frames owed from previous advances.
    carry: f64,
}

/// Sink that consumes queued audio lazily, whenever it is observed.
struct VirtualSink {
    inner: QueueSink,
    speed: f64,
    clock: Mutex<DrainClock>,
}

impl VirtualSink {
    /// Drain whatever the device would have played since the last call.
    fn advance(&self) {
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(clock.last).as_secs_f64();
        clock.last = now;
        if self.inner.is_paused() {
            clock.carry = 0.0;
            return;
        }
        let format = self.inner.format;
        let owed = elapsed * format.sample_rate as f64 * self.speed + clock.carry;
        let whole = owed.floor();
        clock.carry = owed - whole;
        let wanted = whole as usize * format.channels as usize;
        if wanted == 0 {
            return;
        }
        let drained = self.inner.queue().discard(wanted);
        if drained < wanted {
            clock.carry = 0.0;
            if drained > 0 || !self.inner.queue().is_closed() {
                self.inner.note_underrun();
            }
        }
    }
}

impl OutputSink for VirtualSink {
    fn format(&self) -> OutputFormat {
        self.inner.format()
    }

    fn push(&self, pcm: PcmBuffer) -> Result<(), SinkError> {
        self.advance();
        self.inner.push(pcm)
    }

    fn queued_bytes(&self) -> usize {
        self.advance();
        self.inner.queued_bytes()
    }

    fn flush(&self) {
        self.advance();
        self.inner.flush();
    }

    fn set_paused(&self, paused: bool) {
        self.advance();
        self.inner.set_paused(paused);
    }

    fn close(&self) {
        self.inner.close();
    }

    fn underrun_events(&self) -> u64 {
        self.inner.underrun_events()
    }
}
