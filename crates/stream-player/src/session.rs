//! Playback session: one loaded track, its output device and the transport.
//!
//! The session is driven from a single control thread. Transport calls only touch
//! atomics, except `stop` (and `load`, which stops first), which joins the
//! decode worker.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::EngineConfig;
use crate::decode::{self, TrackInfo};
use crate::error::{LoadError, TransportError};
use crate::resample::Resampler;
use crate::sink::{OutputBackend, OutputDevice, OutputFormat, OutputRequest, OutputSink};
use crate::status::StatusSnapshot;
use crate::transport::{PlaybackState, Transport};
use crate::worker::{self, Pipeline, WorkerContext};

/// Rate and channel count requested when the container declares none.
const FALLBACK_FORMAT: OutputFormat = OutputFormat {
    sample_rate: 44_100,
    channels: 2,
};

/// Everything owned for the currently loaded track. Dropping it releases the device.
struct LoadedTrack {
    info: TrackInfo,
    sink: Arc<dyn OutputSink>,
    /// Idle pipeline; `None` while a worker owns it.
    pipeline: Option<Pipeline>,
    worker: Option<JoinHandle<Pipeline>>,
    _device: Box<dyn OutputDevice>,
}

impl LoadedTrack {
    /// Join a finished or stopping worker and take back its pipeline.
    fn reclaim(&mut self) {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(pipeline) => self.pipeline = Some(pipeline),
                Err(_) => tracing::error!(
                    path = %self.info.path.display(),
                    "decode worker panicked; track must be reloaded"
                ),
            }
        }
    }
}

impl Drop for LoadedTrack {
    fn drop(&mut self) {
        self.sink.close();
    }
}

/// A single-track player.
pub struct Session {
    backend: Box<dyn OutputBackend>,
    config: EngineConfig,
    transport: Arc<Transport>,
    track: Option<LoadedTrack>,
}

impl Session {
    pub fn new(backend: Box<dyn OutputBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config: config.normalized(),
            transport: Arc::new(Transport::new()),
            track: None,
        }
    }

    /// Replace the current track with `path`.
    ///
    /// Stops playback and releases the previous track first. On failure the
    /// session is left without a track.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<TrackInfo, LoadError> {
        let path = path.as_ref();
        self.stop();
        self.track = None;

        let opened = decode::open_track(path)?;
        let info = opened.info;

        let requested = OutputFormat::new(
            if info.sample_rate > 0 {
                info.sample_rate
            } else {
                FALLBACK_FORMAT.sample_rate
            },
            if info.channels > 0 {
                info.channels
            } else {
                FALLBACK_FORMAT.channels
            },
        );
        let device = self.backend.open(&OutputRequest {
            format: requested,
            capacity_seconds: self.config.queue_capacity_seconds,
        })?;
        let sink = device.sink();
        let output = sink.format();

        let resampler = Resampler::new(
            requested.sample_rate,
            requested.channels as usize,
            output,
            self.config.chunk_frames,
        )?;

        tracing::info!(
            path = %path.display(),
            source_rate_hz = info.sample_rate,
            source_channels = info.channels,
            output_rate_hz = output.sample_rate,
            output_channels = output.channels,
            resampling = resampler.is_resampling(),
            "track loaded"
        );

        self.track = Some(LoadedTrack {
            info: info.clone(),
            sink,
            pipeline: Some(Pipeline::new(opened.source, opened.decoder, resampler)),
            worker: None,
            _device: device,
        });
        Ok(info)
    }

    /// Start or resume playback.
    pub fn play(&mut self) -> Result<(), TransportError> {
        let track = self.track.as_mut().ok_or(TransportError::NoTrack)?;
        match self.transport.state() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                if self
                    .transport
                    .transition(PlaybackState::Paused, PlaybackState::Playing)
                {
                    track.sink.set_paused(false);
                    tracing::info!("playback resumed");
                    return Ok(());
                }
            }
            PlaybackState::Stopped => {}
        }

        track.reclaim();
        let Some(mut pipeline) = track.pipeline.take() else {
            self.track = None;
            return Err(TransportError::NoTrack);
        };
        if pipeline.started {
            pipeline.rewind();
            if !self.transport.seek_pending() {
                self.transport.set_clock(0.0);
            }
        }

        self.transport.clear_stop();
        self.transport.set_state(PlaybackState::Playing);
        let ctx = WorkerContext {
            transport: self.transport.clone(),
            sink: track.sink.clone(),
            config: self.config.clone(),
        };
        match worker::spawn(pipeline, ctx) {
            Ok(handle) => {
                track.worker = Some(handle);
                track.sink.set_paused(false);
                tracing::info!("playback started");
                Ok(())
            }
            Err(e) => {
                self.transport.set_state(PlaybackState::Stopped);
                self.track = None;
                Err(TransportError::WorkerSpawn(e))
            }
        }
    }

    /// Pause the device without stopping the worker. Only valid while playing.
    pub fn pause(&self) -> Result<(), TransportError> {
        let track = self.track.as_ref().ok_or(TransportError::NotPlaying)?;
        if !self
            .transport
            .transition(PlaybackState::Playing, PlaybackState::Paused)
        {
            return Err(TransportError::NotPlaying);
        }
        track.sink.set_paused(true);
        tracing::info!(position_secs = self.transport.clock(), "playback paused");
        Ok(())
    }

    /// Stop playback and rewind the clock. Idempotent; the track stays loaded.
    pub fn stop(&mut self) {
        self.transport.request_stop();
        self.transport.set_state(PlaybackState::Stopped);
        self.transport.clear_seek();
        if let Some(track) = self.track.as_mut() {
            track.sink.set_paused(true);
            track.sink.flush();
            if track.worker.is_some() {
                track.reclaim();
                track.sink.flush();
                tracing::info!("playback stopped");
            }
            if track.pipeline.is_none() {
                self.track = None;
            }
        }
        self.transport.set_clock(0.0);
    }

    /// Request a seek to `seconds`, clamped to the track. Returns the clamped target.
    ///
    /// The worker services it asynchronously; while stopped it applies when
    /// playback next starts.
    pub fn seek(&self, seconds: f64) -> Result<f64, TransportError> {
        let track = self.track.as_ref().ok_or(TransportError::NoTrack)?;
        if !seconds.is_finite() {
            return Err(TransportError::InvalidSeekTarget(seconds));
        }
        let target = clamp_seek_target(seconds, track.info.duration_secs);
        self.transport.request_seek(target);
        if self.transport.state() == PlaybackState::Stopped {
            self.transport.set_clock(target);
        }
        tracing::debug!(requested_secs = seconds, target_secs = target, "seek requested");
        Ok(target)
    }

    /// Set the output volume, clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        self.transport.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.transport.volume()
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    /// Playback position in seconds.
    pub fn current_time(&self) -> f64 {
        self.transport.clock()
    }

    /// Track duration in seconds, 0.0 when unknown or nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.track
            .as_ref()
            .map(|t| t.info.duration_secs)
            .unwrap_or(0.0)
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.track.as_ref().map(|t| t.info.path.as_path())
    }

    /// Tag value for `key` (case-insensitive).
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.track.as_ref().and_then(|t| t.info.metadata(key))
    }

    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref().map(|t| &t.info)
    }

    /// Negotiated device format of the loaded track.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.track.as_ref().map(|t| t.sink.format())
    }

    pub fn status(&self) -> StatusSnapshot {
        let track = self.track.as_ref();
        StatusSnapshot {
            state: self.state(),
            position_secs: self.current_time(),
            duration_secs: self.duration(),
            volume: self.volume(),
            file: track.map(|t| t.info.path.clone()),
            source_codec: track.and_then(|t| t.info.codec.clone()),
            source_rate_hz: track
                .map(|t| t.info.sample_rate)
                .filter(|rate| *rate > 0),
            output: track.map(|t| t.sink.format()),
            queued_bytes: track.map(|t| t.sink.queued_bytes()).unwrap_or(0),
            underrun_events: track.map(|t| t.sink.underrun_events()).unwrap_or(0),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        self.track = None;
    }
}

/// Clamp to `[0, duration]`, or `[0, ∞)` when the duration is unknown.
fn clamp_seek_target(seconds: f64, duration_secs: f64) -> f64 {
    let lower = seconds.max(0.0);
    if duration_secs > 0.0 {
        lower.min(duration_secs)
    } else {
        lower
    }
}
