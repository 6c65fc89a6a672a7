use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use stream_player::{
    EngineConfig, LoadError, OutputFormat, PlaybackState, Session, TransportError,
    VirtualBackend,
};

fn write_wav(dir: &Path, name: &str, rate: u32, channels: u16, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (rate as f32 * secs) as usize;
    for i in 0..frames {
        let phase = i as f32 * 440.0 * 2.0 * PI / rate as f32;
        let s = (phase.sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(s).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

fn test_config() -> EngineConfig {
    EngineConfig {
        backpressure_seconds: 0.05,
        poll_interval: Duration::from_millis(2),
        drain_poll_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

fn session_with(backend: VirtualBackend) -> Session {
    Session::new(Box::new(backend), test_config())
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn load_nonexistent_file_fails_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_with(VirtualBackend::new());
    let err = session.load(dir.path().join("missing.flac")).unwrap_err();
    assert!(matches!(err, LoadError::NotFound(_)));
    assert_eq!(session.state(), PlaybackState::Stopped);
    assert!(session.current_file().is_none());
    assert!(matches!(session.play(), Err(TransportError::NoTrack)));
}

#[test]
fn load_garbage_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.wav");
    std::fs::write(&path, vec![0x5au8; 512]).unwrap();
    let mut session = session_with(VirtualBackend::new());
    let err = session.load(&path).unwrap_err();
    assert!(matches!(
        err,
        LoadError::UnsupportedContainer(_) | LoadError::Unreadable { .. }
    ));
    assert!(session.current_file().is_none());
}

#[test]
fn load_fails_when_no_device_is_available() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 0.5);
    let mut session = session_with(VirtualBackend::unavailable());
    let err = session.load(&path).unwrap_err();
    assert!(matches!(err, LoadError::DeviceUnavailable(_)));
    assert!(session.current_file().is_none());
    assert_eq!(session.duration(), 0.0);
}

#[test]
fn load_reports_track_info() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 2.0);
    let mut session = session_with(VirtualBackend::new());
    let info = session.load(&path).unwrap();
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.channels, 2);
    assert!((info.duration_secs - 2.0).abs() < 0.01);
    assert_eq!(session.current_file(), Some(path.as_path()));
    assert_eq!(session.output_format(), Some(OutputFormat::new(44_100, 2)));
    assert_eq!(session.state(), PlaybackState::Stopped);
    assert_eq!(session.current_time(), 0.0);
}

#[test]
fn play_advances_clock_monotonically() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 3.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    session.play().unwrap();
    assert_eq!(session.state(), PlaybackState::Playing);
    session.play().unwrap();

    let mut last = 0.0;
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(20));
        let now = session.current_time();
        assert!(now >= last, "clock went backwards: {now} < {last}");
        last = now;
    }
    assert!(last > 0.0);
    session.stop();
}

#[test]
fn pause_then_play_continues_from_paused_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 3.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(200));

    session.pause().unwrap();
    assert_eq!(session.state(), PlaybackState::Paused);
    assert!(matches!(session.pause(), Err(TransportError::NotPlaying)));
    let paused_at = session.current_time();
    assert!(paused_at > 0.1);

    thread::sleep(Duration::from_millis(100));
    assert!(session.current_time() < paused_at + 0.1);

    session.play().unwrap();
    assert_eq!(session.state(), PlaybackState::Playing);
    thread::sleep(Duration::from_millis(100));
    assert!(session.current_time() >= paused_at);
    session.stop();
}

#[test]
fn seek_converges_to_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 4.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(50));

    session.seek(2.5).unwrap();
    assert!(wait_for(Duration::from_secs(1), || {
        let t = session.current_time();
        (2.5..2.9).contains(&t)
    }));

    session.seek(0.5).unwrap();
    assert!(wait_for(Duration::from_secs(1), || {
        let t = session.current_time();
        (0.5..0.9).contains(&t)
    }));
    assert!(session.status().queued_secs() < 0.5);
    session.stop();
}

#[test]
fn seek_while_paused_moves_clock_and_play_continues_there() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 4.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    session.pause().unwrap();

    session.seek(2.5).unwrap();
    assert!(wait_for(Duration::from_secs(1), || {
        (2.5..2.7).contains(&session.current_time())
    }));
    assert_eq!(session.state(), PlaybackState::Paused);

    session.play().unwrap();
    thread::sleep(Duration::from_millis(150));
    let t = session.current_time();
    assert!((2.5..3.0).contains(&t), "position {t}");
    session.stop();
}

#[test]
fn seek_discards_audio_queued_before_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 4.0);
    let config = EngineConfig {
        backpressure_seconds: 1.0,
        queue_capacity_seconds: 4.0,
        poll_interval: Duration::from_millis(2),
        ..EngineConfig::default()
    };
    let mut session = Session::new(Box::new(VirtualBackend::new()), config);
    session.load(&path).unwrap();
    session.play().unwrap();
    session.pause().unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        session.status().queued_secs() >= 0.9
    }));
    assert!(session.current_time() >= 0.9);

    // While paused the worker only decodes past the target if the queue was emptied.
    session.seek(2.0).unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        session.current_time() >= 2.9
    }));
    assert_eq!(session.state(), PlaybackState::Paused);
    assert!(session.status().queued_secs() < 1.2);
    session.stop();
}

#[test]
fn undersized_queue_still_holds_a_backpressure_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 3.0);
    let config = EngineConfig {
        backpressure_seconds: 0.5,
        queue_capacity_seconds: 0.1,
        poll_interval: Duration::from_millis(2),
        ..EngineConfig::default()
    };
    let mut session = Session::new(Box::new(VirtualBackend::new()), config);
    session.load(&path).unwrap();
    session.play().unwrap();
    session.pause().unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        session.status().queued_secs() >= 0.45
    }));
    session.stop();
}

#[test]
fn idle_after_end_of_stream_counts_no_underruns() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "short.wav", 44_100, 2, 0.2);
    let mut session = session_with(VirtualBackend::new().with_speed(4.0));
    session.load(&path).unwrap();
    session.play().unwrap();
    assert!(wait_for(Duration::from_secs(3), || {
        session.state() == PlaybackState::Stopped
    }));

    let at_stop = session.status().underrun_events;
    for _ in 0..20 {
        thread::sleep(Duration::from_millis(10));
        assert_eq!(session.status().underrun_events, at_stop);
    }
}

#[test]
fn seek_rejects_non_finite_targets() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 0.5);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    assert!(matches!(
        session.seek(f64::NAN),
        Err(TransportError::InvalidSeekTarget(_))
    ));
    assert!(matches!(
        session.seek(f64::INFINITY),
        Err(TransportError::InvalidSeekTarget(_))
    ));
}

#[test]
fn seek_while_stopped_applies_on_play() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 3.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    let target = session.seek(99.0).unwrap();
    assert!((target - 3.0).abs() < 0.01);
    assert!((session.current_time() - 3.0).abs() < 0.01);

    session.seek(1.5).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    let t = session.current_time();
    assert!((1.5..2.0).contains(&t), "position {t}");
    session.stop();
}

#[test]
fn stop_twice_resets_clock_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 3.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&path).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(100));

    session.stop();
    assert_eq!(session.state(), PlaybackState::Stopped);
    assert_eq!(session.current_time(), 0.0);
    assert_eq!(session.status().queued_bytes, 0);

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(session.state(), PlaybackState::Stopped);
    assert_eq!(session.current_time(), 0.0);
    assert!(session.current_file().is_some());
}

#[test]
fn end_of_stream_stops_and_play_restarts_from_the_top() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "short.wav", 44_100, 2, 0.3);
    let mut session = session_with(VirtualBackend::new().with_speed(4.0));
    session.load(&path).unwrap();
    session.play().unwrap();

    assert!(wait_for(Duration::from_secs(3), || {
        session.state() == PlaybackState::Stopped
    }));
    assert_eq!(session.status().queued_bytes, 0);

    session.play().unwrap();
    assert_eq!(session.state(), PlaybackState::Playing);
    assert!(session.current_time() < 0.2);
    assert!(wait_for(Duration::from_secs(3), || {
        session.state() == PlaybackState::Stopped
    }));
}

#[test]
fn resamples_to_negotiated_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "mono.wav", 22_050, 1, 2.0);
    let backend = VirtualBackend::new().with_format(OutputFormat::new(48_000, 2));
    let mut session = session_with(backend);
    let info = session.load(&path).unwrap();
    assert_eq!(info.sample_rate, 22_050);
    assert_eq!(session.output_format(), Some(OutputFormat::new(48_000, 2)));

    session.play().unwrap();
    assert!(wait_for(Duration::from_secs(1), || session.current_time() > 0.1));
    let status = session.status();
    assert_eq!(status.resampling(), Some(true));
    assert_eq!(status.queued_bytes % 4, 0);
    session.stop();
}

#[test]
fn load_replaces_the_previous_track() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_wav(dir.path(), "first.wav", 44_100, 2, 2.0);
    let second = write_wav(dir.path(), "second.wav", 48_000, 1, 1.0);
    let mut session = session_with(VirtualBackend::new());
    session.load(&first).unwrap();
    session.play().unwrap();
    thread::sleep(Duration::from_millis(50));

    let info = session.load(&second).unwrap();
    assert_eq!(info.sample_rate, 48_000);
    assert_eq!(session.state(), PlaybackState::Stopped);
    assert_eq!(session.current_time(), 0.0);
    assert_eq!(session.current_file(), Some(second.as_path()));
    assert!((session.duration() - 1.0).abs() < 0.01);
}

#[test]
fn volume_persists_across_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 44_100, 2, 0.5);
    let mut session = session_with(VirtualBackend::new());
    session.set_volume(0.3);
    session.load(&path).unwrap();
    assert!((session.volume() - 0.3).abs() < 1e-6);
    session.set_volume(7.0);
    assert_eq!(session.volume(), 1.0);
}
