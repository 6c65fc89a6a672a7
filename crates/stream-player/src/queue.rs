//! Thread-safe bounded queue of interleaved signed 16-bit samples.
//!
//! This is the only bulk-data handoff in the crate:
//! - the decode worker pushes converted PCM
//! - the device (CPAL callback or virtual clock) drains it without blocking
//!
//! The producer never blocks here; backpressure is applied by the worker, which
//! polls [`PcmQueue::len_bytes`] before reading more input.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::SinkError;

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Bounded FIFO of interleaved `i16` samples.
///
/// ## Design
/// - **Single producer / single consumer** in practice, but safe from any thread.
/// - **Bounded** by `max_samples`; a push that would overflow is rejected whole.
/// - A `closed` flag lives under the same mutex as the samples.
pub struct PcmQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    max_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct QueueInner {
    samples: VecDeque<i16>,
    closed: bool,
}

impl PcmQueue {
    /// Create a queue holding at most `max_bytes` of audio.
    pub fn new(channels: usize, max_bytes: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            max_samples: max_bytes / BYTES_PER_SAMPLE,
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Currently queued bytes (best-effort snapshot).
    pub fn len_bytes(&self) -> usize {
        self.lock().samples.len() * BYTES_PER_SAMPLE
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Append samples. Fails if the queue is closed or the samples do not fit.
    pub fn push(&self, samples: &[i16]) -> Result<(), SinkError> {
        let mut g = self.lock();
        if g.closed {
            return Err(SinkError::Closed);
        }
        if g.samples.len() + samples.len() > self.max_samples {
            return Err(SinkError::Full {
                queued: g.samples.len() * BYTES_PER_SAMPLE,
            });
        }
        g.samples.extend(samples.iter().copied());
        Ok(())
    }

    /// Fill `out` from the front of the queue, converting each sample.
    ///
    /// Never blocks on anything but the queue mutex. Returns how many slots of
    /// `out` were written; the rest are left untouched.
    pub fn pop_into<T>(&self, out: &mut [T], convert: impl Fn(i16) -> T) -> usize {
        let mut g = self.lock();
        let take = out.len().min(g.samples.len());
        for (slot, sample) in out.iter_mut().zip(g.samples.drain(..take)) {
            *slot = convert(sample);
        }
        let remaining = g.samples.len();
        drop(g);
        if take > 0 {
            self.log_low_watermark(remaining);
        }
        take
    }

    /// Drop up to `n` samples from the front of the queue. Returns how many were dropped.
    pub fn discard(&self, n: usize) -> usize {
        let mut g = self.lock();
        let take = n.min(g.samples.len());
        g.samples.drain(..take);
        take
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        self.lock().samples.clear();
    }

    /// Reject further pushes and drop queued audio. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.samples.clear();
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_samples / 16).max(self.channels * 16);
        if queued == 0 || queued >= threshold {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::debug!(
                queued_samples = queued,
                threshold_samples = threshold,
                "pcm queue low watermark"
            );
        }
    }
}
