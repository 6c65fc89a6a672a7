//! Interactive command parsing and display helpers.

use std::path::PathBuf;

use stream_player::{PlaybackState, StatusSnapshot, TrackInfo};

/// One line of interactive input.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Load(PathBuf),
    Play,
    Pause,
    Stop,
    Seek(f64),
    /// `None` reports the current volume.
    Volume(Option<u8>),
    Info,
    Status,
    Debug,
    Help,
    Quit,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command: {0} (type 'help')")]
    Unknown(String),
}

/// Parse a command line. Blank input yields `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "load" | "l" => {
            if rest.is_empty() {
                return Err(ParseError::Usage("load <file>"));
            }
            Command::Load(PathBuf::from(unquote(rest)))
        }
        "play" | "p" => Command::Play,
        "pause" => Command::Pause,
        "stop" | "s" => Command::Stop,
        "seek" => {
            let secs = parse_position(rest).ok_or(ParseError::Usage("seek <seconds|m:ss>"))?;
            Command::Seek(secs)
        }
        "volume" | "vol" | "v" => {
            if rest.is_empty() {
                Command::Volume(None)
            } else {
                let v = rest
                    .parse::<u8>()
                    .ok()
                    .filter(|v| *v <= 100)
                    .ok_or(ParseError::Usage("volume [0-100]"))?;
                Command::Volume(Some(v))
            }
        }
        "info" | "i" => Command::Info,
        "status" | "st" => Command::Status,
        "debug" | "d" => Command::Debug,
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Accepts plain seconds (`75`, `12.5`) or `m:ss`.
fn parse_position(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    let secs = match s.split_once(':') {
        Some((m, sec)) => {
            let m = m.parse::<u64>().ok()?;
            let sec = sec.parse::<f64>().ok()?;
            if !(0.0..60.0).contains(&sec) {
                return None;
            }
            m as f64 * 60.0 + sec
        }
        None => s.parse::<f64>().ok()?,
    };
    secs.is_finite().then_some(secs)
}

/// Format seconds as `m:ss`.
pub fn format_time(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn state_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "STOPPED",
        PlaybackState::Playing => "PLAYING",
        PlaybackState::Paused => "PAUSED",
    }
}

pub fn help_text() -> &'static str {
    "commands:
  load|l <file>       load a file (stops current playback)
  play|p              start or resume playback
  pause               pause playback
  stop|s              stop and rewind
  seek <secs|m:ss>    jump to a position
  volume|vol|v [0-100] show or set volume
  info|i              track details
  status|st           one-line status
  debug|d             engine diagnostics
  help|h              this help
  quit|exit|q         exit"
}

/// Multi-line description of a loaded track.
pub fn track_summary(info: &TrackInfo) -> String {
    let mut lines = vec![format!("file:     {}", info.path.display())];
    for (label, key) in [
        ("title", "title"),
        ("artist", "artist"),
        ("album", "album"),
        ("genre", "genre"),
    ] {
        if let Some(v) = info.metadata(key) {
            lines.push(format!("{label:<9} {v}"));
        }
    }
    lines.push(format!(
        "format:   {} {} Hz, {} ch{}",
        info.codec.as_deref().unwrap_or("unknown"),
        info.sample_rate,
        info.channels,
        info.bits_per_sample
            .map(|b| format!(", {b}-bit"))
            .unwrap_or_default()
    ));
    lines.push(format!("duration: {}", format_time(info.duration_secs)));
    lines.join("\n")
}

/// `[PLAYING] 1:05 / 3:20  vol 80%`
pub fn status_line(status: &StatusSnapshot) -> String {
    format!(
        "[{}] {} / {} ({}%)  vol {}%",
        state_label(status.state),
        format_time(status.position_secs),
        format_time(status.duration_secs),
        (status.progress() * 100.0).round() as u32,
        (status.volume * 100.0).round() as u32
    )
}

/// Engine diagnostics for the `debug` command.
pub fn debug_report(status: &StatusSnapshot) -> String {
    let output = status
        .output
        .map(|f| format!("{} Hz, {} ch, s16", f.sample_rate, f.channels))
        .unwrap_or_else(|| "none".to_string());
    let resampling = match status.resampling() {
        Some(true) => format!(
            "{} Hz -> {} Hz",
            status.source_rate_hz.unwrap_or(0),
            status.output.map(|f| f.sample_rate).unwrap_or(0)
        ),
        Some(false) => "off".to_string(),
        None => "n/a".to_string(),
    };
    [
        format!("state:      {}", state_label(status.state)),
        format!(
            "position:   {:.3}s / {:.3}s",
            status.position_secs, status.duration_secs
        ),
        format!(
            "file:       {}",
            status
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
        format!(
            "codec:      {}",
            status.source_codec.as_deref().unwrap_or("n/a")
        ),
        format!("output:     {output}"),
        format!("resampling: {resampling}"),
        format!(
            "queued:     {} bytes ({:.2}s)",
            status.queued_bytes,
            status.queued_secs()
        ),
        format!("underruns:  {}", status.underrun_events),
        format!("volume:     {:.2}", status.volume),
    ]
    .join("\n")
}
