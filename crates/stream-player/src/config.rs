use std::time::Duration;

/// Engine tuning parameters shared by the decode worker, resampler and output sink.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Queued audio (seconds of the negotiated format) above which the worker stops reading.
    pub backpressure_seconds: f32,
    /// Hard cap on queued audio; pushes beyond it are rejected by the sink.
    pub queue_capacity_seconds: f32,
    /// Sleep between backpressure re-checks.
    pub poll_interval: Duration,
    /// Sleep between queue-depth checks while draining at end of stream.
    pub drain_poll_interval: Duration,
    /// Backoff after a transient packet read error.
    pub read_error_backoff: Duration,
    /// Consecutive read errors after which the stream is treated as ended.
    pub max_consecutive_read_errors: u32,
}

impl Default for EngineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            backpressure_seconds: 1.0,
            queue_capacity_seconds: 4.0,
            poll_interval: Duration::from_millis(10),
            drain_poll_interval: Duration::from_millis(20),
            read_error_backoff: Duration::from_millis(1),
            max_consecutive_read_errors: 64,
        }
    }
}

impl EngineConfig {
    /// Repair settings the worker cannot run with.
    ///
    /// The queue must hold at least two backpressure windows, otherwise pushes hit
    /// the cap before backpressure engages and audio is dropped.
    pub fn normalized(mut self) -> Self {
        self.chunk_frames = self.chunk_frames.max(1);
        if !(self.backpressure_seconds.is_finite() && self.backpressure_seconds > 0.0) {
            self.backpressure_seconds = Self::default().backpressure_seconds;
        }
        let min_capacity = self.backpressure_seconds * 2.0;
        if self.queue_capacity_seconds.is_nan() || self.queue_capacity_seconds < min_capacity {
            self.queue_capacity_seconds = min_capacity;
        }
        self.max_consecutive_read_errors = self.max_consecutive_read_errors.max(1);
        self
    }
}

/// Compute a queue size in **bytes** for `seconds` of signed 16-bit audio.
///
/// Non-finite or non-positive `seconds` fall back to one second.
pub fn bytes_for_seconds(rate_hz: u32, channels: u16, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        1.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames
        .saturating_mul(channels as usize)
        .saturating_mul(std::mem::size_of::<i16>())
}
