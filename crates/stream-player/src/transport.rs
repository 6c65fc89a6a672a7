//! Cross-thread transport state.
//!
//! Everything the caller and the decode worker share lives here as individual
//! atomics: playback state, volume, the playback clock, the pending seek and the
//! stop flag. `f32`/`f64` values are stored as their bit patterns.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Authoritative playback state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    #[default]
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

/// Shared control block between the session and its decode worker.
#[derive(Debug)]
pub struct Transport {
    state: AtomicU8,
    volume: AtomicU32,
    clock: AtomicU64,
    seek_pending: AtomicBool,
    seek_target: AtomicU64,
    stop: AtomicBool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            volume: AtomicU32::new(1.0f32.to_bits()),
            clock: AtomicU64::new(0.0f64.to_bits()),
            seek_pending: AtomicBool::new(false),
            seek_target: AtomicU64::new(0.0f64.to_bits()),
            stop: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to` only if the state is still `from`.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Store a clamped volume and return the stored value.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let v = clamp_volume(volume);
        self.volume.store(v.to_bits(), Ordering::Relaxed);
        v
    }

    /// Playback position in seconds.
    pub fn clock(&self) -> f64 {
        f64::from_bits(self.clock.load(Ordering::Relaxed))
    }

    pub fn set_clock(&self, seconds: f64) {
        self.clock.store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Record a seek for the worker. A newer request replaces an unserviced one.
    pub fn request_seek(&self, seconds: f64) {
        self.seek_target.store(seconds.to_bits(), Ordering::Relaxed);
        self.seek_pending.store(true, Ordering::Release);
    }

    /// Take the pending seek target, clearing the request.
    pub fn take_seek(&self) -> Option<f64> {
        if self.seek_pending.swap(false, Ordering::AcqRel) {
            Some(f64::from_bits(self.seek_target.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::Acquire)
    }

    pub fn clear_seek(&self) {
        self.seek_pending.store(false, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Clamp to `[0.0, 1.0]`; NaN maps to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
