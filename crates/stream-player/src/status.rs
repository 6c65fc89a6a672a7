use std::path::PathBuf;

use crate::sink::OutputFormat;
use crate::transport::PlaybackState;

/// Point-in-time view of a session, for status lines and diagnostics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    /// Playback clock in seconds.
    pub position_secs: f64,
    /// Track duration in seconds, 0.0 when unknown or nothing is loaded.
    pub duration_secs: f64,
    pub volume: f32,
    /// Loaded file, if any.
    pub file: Option<PathBuf>,
    /// Source codec name (for example, FLAC/MP3).
    pub source_codec: Option<String>,
    /// Source sample rate before conversion.
    pub source_rate_hz: Option<u32>,
    /// Negotiated device format.
    pub output: Option<OutputFormat>,
    /// Audio waiting in the sink queue.
    pub queued_bytes: usize,
    /// Number of underrun incidents observed by the device.
    pub underrun_events: u64,
}

impl StatusSnapshot {
    /// Seconds of audio waiting in the sink queue.
    pub fn queued_secs(&self) -> f64 {
        self.output
            .map(|f| f.secs_for_bytes(self.queued_bytes))
            .unwrap_or(0.0)
    }

    /// Whether source audio is being sample-rate converted for the device.
    pub fn resampling(&self) -> Option<bool> {
        match (self.source_rate_hz, self.output) {
            (Some(src), Some(out)) => Some(src != out.sample_rate),
            _ => None,
        }
    }

    /// Position as a fraction of the duration, clamped to `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.duration_secs <= 0.0 {
            return 0.0;
        }
        (self.position_secs / self.duration_secs).clamp(0.0, 1.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_queue_depth_in_seconds() {
        let snap = StatusSnapshot {
            output: Some(OutputFormat::new(48_000, 2)),
            queued_bytes: 96_000,
            ..Default::default()
        };
        assert!((snap.queued_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn snapshot_without_output_has_no_queue() {
        let snap = StatusSnapshot {
            queued_bytes: 1024,
            ..Default::default()
        };
        assert_eq!(snap.queued_secs(), 0.0);
        assert_eq!(snap.resampling(), None);
    }

    #[test]
    fn snapshot_reports_resampling() {
        let snap = StatusSnapshot {
            source_rate_hz: Some(44_100),
            output: Some(OutputFormat::new(48_000, 2)),
            ..Default::default()
        };
        assert_eq!(snap.resampling(), Some(true));
    }

    #[test]
    fn progress_is_clamped() {
        let mut snap = StatusSnapshot {
            position_secs: 30.0,
            duration_secs: 120.0,
            ..Default::default()
        };
        assert!((snap.progress() - 0.25).abs() < 1e-6);
        snap.position_secs = 500.0;
        assert_eq!(snap.progress(), 1.0);
        snap.duration_secs = 0.0;
        assert_eq!(snap.progress(), 0.0);
    }
}
