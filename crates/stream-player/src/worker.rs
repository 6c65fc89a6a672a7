//! Decode worker.
//!
//! One background thread per playback run. It owns the decode pipeline while
//! running and hands it back through its `JoinHandle` when it exits, so the
//! session can start another run on the same track.
//!
//! Each iteration:
//! 1. honor a stop request
//! 2. service a pending seek
//! 3. apply backpressure against the sink queue
//! 4. read, decode, convert and push one packet, then advance the clock

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::{EngineConfig, bytes_for_seconds};
use crate::decode::{AudioDecoder, MediaSource, ReadOutcome, SourcePacket};
use crate::resample::Resampler;
use crate::sink::OutputSink;
use crate::transport::{PlaybackState, Transport};

/// Demuxer, decoder and converter for the loaded track.
pub(crate) struct Pipeline {
    pub source: MediaSource,
    pub decoder: AudioDecoder,
    pub resampler: Resampler,
    /// Set once a run has read from the source; the next run starts from the top.
    pub started: bool,
}

impl Pipeline {
    pub fn new(source: MediaSource, decoder: AudioDecoder, resampler: Resampler) -> Self {
        Self {
            source,
            decoder,
            resampler,
            started: false,
        }
    }

    /// Return to the start of the track, discarding decoder and converter history.
    pub fn rewind(&mut self) {
        if let Err(e) = self.source.seek(0.0) {
            tracing::warn!("rewind failed: {e}");
        }
        self.decoder.flush();
        self.resampler.reset();
        self.started = false;
    }
}

/// Shared handles the worker needs besides the pipeline.
pub(crate) struct WorkerContext {
    pub transport: Arc<Transport>,
    pub sink: Arc<dyn OutputSink>,
    pub config: EngineConfig,
}

/// Spawn the worker thread.
pub(crate) fn spawn(pipeline: Pipeline, ctx: WorkerContext) -> io::Result<JoinHandle<Pipeline>> {
    thread::Builder::new()
        .name("decode-worker".into())
        .spawn(move || run(pipeline, ctx))
}

enum DrainOutcome {
    Drained,
    Stopped,
    Seeked,
}

fn run(mut p: Pipeline, ctx: WorkerContext) -> Pipeline {
    let format = ctx.sink.format();
    let threshold = bytes_for_seconds(
        format.sample_rate,
        format.channels,
        ctx.config.backpressure_seconds,
    );
    p.started = true;
    tracing::info!(
        threshold_bytes = threshold,
        rate_hz = format.sample_rate,
        channels = format.channels,
        "decode worker started"
    );

    let mut read_errors = 0u32;
    loop {
        if ctx.transport.stop_requested() {
            tracing::debug!("decode worker stop requested");
            break;
        }

        if let Some(target) = ctx.transport.take_seek() {
            read_errors = 0;
            if !service_seek(&mut p, &ctx, target) {
                match end_of_stream(&mut p, &ctx) {
                    DrainOutcome::Seeked => continue,
                    DrainOutcome::Stopped | DrainOutcome::Drained => break,
                }
            }
        }

        if ctx.sink.queued_bytes() > threshold {
            thread::sleep(ctx.config.poll_interval);
            continue;
        }

        let packet = match p.source.next_packet() {
            Ok(ReadOutcome::Packet(packet)) => {
                read_errors = 0;
                packet
            }
            Ok(ReadOutcome::EndOfStream) => match end_of_stream(&mut p, &ctx) {
                DrainOutcome::Seeked => continue,
                DrainOutcome::Stopped | DrainOutcome::Drained => break,
            },
            Err(e) if e.requires_reset() => {
                tracing::warn!("stream reset required; resetting decoder");
                p.decoder.flush();
                continue;
            }
            Err(e) => {
                read_errors += 1;
                if read_errors < ctx.config.max_consecutive_read_errors {
                    tracing::debug!(attempt = read_errors, "packet read failed: {e}");
                    thread::sleep(ctx.config.read_error_backoff);
                    continue;
                }
                tracing::warn!(
                    attempts = read_errors,
                    "persistent read errors; treating as end of stream: {e}"
                );
                read_errors = 0;
                match end_of_stream(&mut p, &ctx) {
                    DrainOutcome::Seeked => continue,
                    DrainOutcome::Stopped | DrainOutcome::Drained => break,
                }
            }
        };

        if packet.track_id != p.source.track_id() {
            continue;
        }
        decode_packet(&mut p, &ctx, &packet);
    }

    tracing::info!(position_secs = ctx.transport.clock(), "decode worker exited");
    p
}

/// Reposition the pipeline at `target` and discard queued audio.
///
/// Returns `false` when the container cannot reach `target` (typically past the
/// end of a stream of unknown length); the caller then finishes the stream.
fn service_seek(p: &mut Pipeline, ctx: &WorkerContext, target: f64) -> bool {
    p.decoder.flush();
    p.resampler.reset();
    ctx.sink.flush();
    if let Err(e) = p.source.seek(target) {
        tracing::warn!(target_secs = target, "seek failed; ending stream: {e}");
        return false;
    }
    ctx.transport.set_clock(target);
    tracing::debug!(target_secs = target, "seek serviced");
    true
}

fn decode_packet(p: &mut Pipeline, ctx: &WorkerContext, packet: &SourcePacket) {
    let frame = match p.decoder.decode(packet) {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(pts = ?packet.pts, "skipping undecodable packet: {e}");
            return;
        }
    };

    match p.resampler.convert(&frame) {
        Ok(mut pcm) if !pcm.is_empty() => {
            pcm.apply_volume(ctx.transport.volume());
            if let Err(e) = ctx.sink.push(pcm) {
                tracing::warn!("dropping frame: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("dropping frame: {e}"),
    }

    let clock = next_clock(
        ctx.transport.clock(),
        packet.pts,
        frame.pts,
        frame.duration_secs(),
    );
    ctx.transport.set_clock(clock);
}

/// Push the converter tail, then wait for the device to play out its queue.
///
/// A fully drained stream leaves the sink paused and the transport Stopped.
fn end_of_stream(p: &mut Pipeline, ctx: &WorkerContext) -> DrainOutcome {
    match p.resampler.finish() {
        Ok(mut pcm) if !pcm.is_empty() => {
            pcm.apply_volume(ctx.transport.volume());
            if let Err(e) = ctx.sink.push(pcm) {
                tracing::warn!("dropping tail: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("dropping tail: {e}"),
    }

    tracing::info!("end of stream; draining output");
    loop {
        if ctx.transport.stop_requested() {
            return DrainOutcome::Stopped;
        }
        if ctx.transport.seek_pending() {
            tracing::debug!("seek during drain; resuming decode");
            return DrainOutcome::Seeked;
        }
        if ctx.sink.queued_bytes() == 0 {
            tracing::info!("playback finished");
            ctx.sink.set_paused(true);
            ctx.transport.set_state(PlaybackState::Stopped);
            return DrainOutcome::Drained;
        }
        thread::sleep(ctx.config.drain_poll_interval);
    }
}

/// Next clock value after a frame of `frame_secs` seconds.
///
/// Prefers the packet timestamp, then the frame timestamp, then extrapolates
/// from `prev`. Never moves backwards.
pub(crate) fn next_clock(
    prev: f64,
    packet_pts: Option<f64>,
    frame_pts: Option<f64>,
    frame_secs: f64,
) -> f64 {
    let derived = packet_pts
        .or(frame_pts)
        .filter(|t| t.is_finite())
        .unwrap_or(prev + frame_secs);
    derived.max(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::open_track;
    use crate::sink::{OutputFormat, PcmBuffer, QueueSink};
    use proptest::prelude::*;
    use std::path::{Path, PathBuf};

    fn write_wav(dir: &Path, secs: f32) -> PathBuf {
        let path = dir.join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(8_000.0 * secs) as usize {
            let s = ((i % 64) as i16 - 32) * 256;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn fixture(secs: f32) -> (tempfile::TempDir, Pipeline, WorkerContext, Arc<QueueSink>) {
        let dir = tempfile::tempdir().unwrap();
        let opened = open_track(&write_wav(dir.path(), secs)).unwrap();
        let format = OutputFormat::new(8_000, 2);
        let resampler = Resampler::new(8_000, 2, format, 256).unwrap();
        let sink = Arc::new(QueueSink::new(format, 4.0));
        let ctx = WorkerContext {
            transport: Arc::new(Transport::new()),
            sink: sink.clone(),
            config: EngineConfig::default(),
        };
        (
            dir,
            Pipeline::new(opened.source, opened.decoder, resampler),
            ctx,
            sink,
        )
    }

    #[test]
    fn seek_discards_queued_audio_and_moves_clock() {
        let (_dir, mut p, ctx, sink) = fixture(2.0);
        sink.push(PcmBuffer::new(vec![1; 8_000 * 2])).unwrap();
        ctx.transport.set_clock(0.4);

        assert!(service_seek(&mut p, &ctx, 1.5));
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(ctx.transport.clock(), 1.5);
    }

    #[test]
    fn seek_past_the_end_reports_end_of_stream() {
        let (_dir, mut p, ctx, sink) = fixture(0.5);
        sink.push(PcmBuffer::new(vec![1; 4_000])).unwrap();
        ctx.transport.set_clock(0.2);

        assert!(!service_seek(&mut p, &ctx, 30.0));
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(ctx.transport.clock(), 0.2);
    }

    #[test]
    fn drained_stream_pauses_sink_and_stops() {
        let (_dir, mut p, ctx, sink) = fixture(0.5);
        ctx.transport.set_state(PlaybackState::Playing);
        sink.set_paused(false);

        assert!(matches!(end_of_stream(&mut p, &ctx), DrainOutcome::Drained));
        assert!(sink.is_paused());
        assert_eq!(ctx.transport.state(), PlaybackState::Stopped);
    }

    #[test]
    fn worker_ends_run_after_unreachable_seek() {
        let (_dir, p, ctx, sink) = fixture(0.5);
        let transport = ctx.transport.clone();
        transport.set_state(PlaybackState::Playing);
        transport.request_seek(30.0);
        sink.set_paused(false);

        let handle = spawn(p, ctx).unwrap();
        let p = handle.join().unwrap();
        assert!(p.started);
        assert_eq!(transport.state(), PlaybackState::Stopped);
        assert!(sink.is_paused());
    }

    #[test]
    fn next_clock_prefers_packet_pts() {
        assert_eq!(next_clock(1.0, Some(2.0), Some(3.0), 0.1), 2.0);
    }

    #[test]
    fn next_clock_falls_back_to_frame_pts() {
        assert_eq!(next_clock(1.0, None, Some(3.0), 0.1), 3.0);
    }

    #[test]
    fn next_clock_extrapolates_without_timestamps() {
        assert!((next_clock(1.0, None, None, 0.25) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn next_clock_never_goes_backwards() {
        assert_eq!(next_clock(5.0, Some(4.0), None, 0.1), 5.0);
        assert_eq!(next_clock(5.0, Some(f64::NAN), None, 0.0), 5.0);
    }

    proptest! {
        #[test]
        fn next_clock_is_monotonic(
            prev in 0.0f64..10_000.0,
            packet in proptest::option::of(0.0f64..10_000.0),
            frame in proptest::option::of(0.0f64..10_000.0),
            secs in 0.0f64..1.0,
        ) {
            prop_assert!(next_clock(prev, packet, frame, secs) >= prev);
        }
    }
}
