//! Decoder adapter.
//!
//! Uses Symphonia to:
//! - probe the input container and pick the first audio stream
//! - read packets with their presentation timestamps
//! - decode packets into interleaved `f32` frames
//!
//! Nothing here spawns threads; the decode worker drives [`MediaSource`] and
//! [`AudioDecoder`] from its own loop.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{LoadError, SourceError};

/// Immutable description of a loaded track.
#[derive(Clone, Debug, Default)]
pub struct TrackInfo {
    /// Path the track was loaded from.
    pub path: PathBuf,
    /// Container track id of the selected audio stream.
    pub stream_index: u32,
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Native sample rate; 0 if the container does not declare one.
    pub sample_rate: u32,
    /// Native channel count; 0 if the container does not declare one.
    pub channels: u16,
    /// Source bit depth (best-effort).
    pub bits_per_sample: Option<u32>,
    /// Total duration in seconds, 0.0 when unknown.
    pub duration_secs: f64,
    /// Lower-cased tag key to value.
    pub metadata: BTreeMap<String, String>,
}

impl TrackInfo {
    /// Look up a tag by key (case-insensitive).
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A demuxed packet from the selected stream.
pub struct SourcePacket {
    /// Container track id the packet belongs to.
    pub track_id: u32,
    /// Presentation time in seconds, when the stream has a time base.
    pub pts: Option<f64>,
    packet: Packet,
}

/// Result of a packet read.
pub enum ReadOutcome {
    Packet(SourcePacket),
    EndOfStream,
}

/// One decoded buffer of interleaved `f32` samples.
#[derive(Clone, Debug, Default)]
pub struct DecodedFrame {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
    /// Timestamp carried by the decoded buffer itself.
    ///
    /// Symphonia decodes one packet into one buffer and the buffer carries no
    /// separate timestamp, so frames built by [`AudioDecoder`] leave this unset.
    pub pts: Option<f64>,
}

impl DecodedFrame {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Duration of the frame in seconds at its own sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Demuxer over an opened container, restricted to one audio stream.
pub struct MediaSource {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    time_base: Option<TimeBase>,
    /// After an accurate seek, packets ending before this timestamp are dropped.
    skip_until_ts: Option<u64>,
}

/// Everything `load` needs from the container: the demuxer, a ready decoder and
/// the track description.
pub struct OpenedTrack {
    pub source: MediaSource,
    pub decoder: AudioDecoder,
    pub info: TrackInfo,
}

/// Open `path`, select its first audio stream and build a decoder for it.
pub fn open_track(path: &Path) -> Result<OpenedTrack, LoadError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| match e {
            SymphoniaError::IoError(source) => LoadError::Unreadable {
                path: path.to_path_buf(),
                source,
            },
            other => LoadError::UnsupportedContainer(other.to_string()),
        })?;

    let mut metadata = BTreeMap::new();
    if let Some(md) = probed.metadata.get() {
        if let Some(rev) = md.current() {
            collect_tags(rev.tags(), &mut metadata);
        }
    }
    let mut reader = probed.format;
    if let Some(rev) = reader.metadata().current() {
        collect_tags(rev.tags(), &mut metadata);
    }

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(LoadError::NoAudioStream)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let decoder = AudioDecoder::open(&codec_params)?;

    let info = TrackInfo {
        path: path.to_path_buf(),
        stream_index: track_id,
        codec: codec_name_from_params(&codec_params),
        sample_rate: codec_params.sample_rate.unwrap_or(0),
        channels: codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0),
        bits_per_sample: codec_params
            .bits_per_sample
            .or(codec_params.bits_per_coded_sample),
        duration_secs: duration_secs_from_codec_params(&codec_params),
        metadata,
    };

    tracing::info!(
        path = %path.display(),
        track_id,
        codec = info.codec.as_deref().unwrap_or("unknown"),
        rate_hz = info.sample_rate,
        channels = info.channels,
        duration_secs = info.duration_secs,
        "track opened"
    );

    Ok(OpenedTrack {
        source: MediaSource {
            reader,
            track_id,
            time_base: codec_params.time_base,
            skip_until_ts: None,
        },
        decoder,
        info,
    })
}

impl MediaSource {
    /// Container track id of the selected stream.
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Read the next packet of any stream.
    ///
    /// Packets of the selected stream that end before a pending seek target are
    /// consumed silently.
    pub fn next_packet(&mut self) -> Result<ReadOutcome, SourceError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(ReadOutcome::EndOfStream);
                }
                Err(e) => return Err(SourceError::Read(e)),
            };

            if packet.track_id() == self.track_id {
                if let Some(required) = self.skip_until_ts {
                    if packet.ts().saturating_add(packet.dur()) <= required {
                        continue;
                    }
                    self.skip_until_ts = None;
                }
            }

            let pts = self
                .time_base
                .map(|tb| seconds_from_time(tb.calc_time(packet.ts())));
            return Ok(ReadOutcome::Packet(SourcePacket {
                track_id: packet.track_id(),
                pts,
                packet,
            }));
        }
    }

    /// Seek the selected stream to `seconds`, landing at or before the target.
    pub fn seek(&mut self, seconds: f64) -> Result<(), SourceError> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(SourceError::Seek)?;

        self.skip_until_ts = (seeked.required_ts > seeked.actual_ts).then_some(seeked.required_ts);
        tracing::debug!(
            target_secs = seconds,
            required_ts = seeked.required_ts,
            actual_ts = seeked.actual_ts,
            "container seek"
        );
        Ok(())
    }
}

/// Stateful packet decoder for the selected stream.
pub struct AudioDecoder {
    decoder: Box<dyn Decoder>,
}

impl AudioDecoder {
    /// Resolve and instantiate a decoder for `params`.
    pub fn open(params: &CodecParameters) -> Result<Self, LoadError> {
        let codecs = symphonia::default::get_codecs();
        if codecs.get_codec(params.codec).is_none() {
            let label =
                codec_name_from_params(params).unwrap_or_else(|| format!("{:?}", params.codec));
            return Err(LoadError::UnsupportedCodec(label));
        }
        let decoder = codecs
            .make(params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => LoadError::UnsupportedCodec(what.to_string()),
                other => LoadError::CodecInitFailed(other.to_string()),
            })?;
        Ok(Self { decoder })
    }

    /// Decode one packet. `Ok(None)` means the packet produced no audio.
    pub fn decode(&mut self, packet: &SourcePacket) -> Result<Option<DecodedFrame>, SourceError> {
        let decoded = self
            .decoder
            .decode(&packet.packet)
            .map_err(SourceError::Decode)?;

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }
        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        Ok(Some(DecodedFrame {
            samples: sample_buf.samples().to_vec(),
            channels: spec.channels.count(),
            sample_rate: spec.rate,
            pts: None,
        }))
    }

    /// Drop any internal decoder state (after a seek or a stream reset).
    pub fn flush(&mut self) {
        self.decoder.reset();
    }
}

impl SourceError {
    /// Whether the demuxer asked for the decoder to be reset before continuing.
    pub fn requires_reset(&self) -> bool {
        matches!(self, SourceError::Read(SymphoniaError::ResetRequired))
    }
}

fn seconds_from_time(time: Time) -> f64 {
    time.seconds as f64 + time.frac
}

/// Best-effort duration in seconds from codec metadata.
///
/// Returns `0.0` if the container does not provide total frames.
fn duration_secs_from_codec_params(params: &CodecParameters) -> f64 {
    let Some(n_frames) = params.n_frames else {
        return 0.0;
    };
    if let Some(tb) = params.time_base {
        return seconds_from_time(tb.calc_time(n_frames));
    }
    match params.sample_rate {
        Some(rate) if rate > 0 => n_frames as f64 / rate as f64,
        _ => 0.0,
    }
}

/// Merge tags into `out` under lower-cased keys.
///
/// Standard tags are stored under a canonical name (`title`, `artist`, ...) and
/// overwrite earlier values; raw keys only fill gaps.
fn collect_tags(tags: &[Tag], out: &mut BTreeMap<String, String>) {
    for tag in tags {
        let value = tag.value.to_string();
        if let Some(name) = tag.std_key.as_ref().and_then(standard_key_name) {
            out.insert(name.to_string(), value.clone());
        }
        let raw = tag.key.to_ascii_lowercase();
        if !raw.is_empty() {
            out.entry(raw).or_insert(value);
        }
    }
}

fn standard_key_name(key: &StandardTagKey) -> Option<&'static str> {
    let name = match key {
        StandardTagKey::TrackTitle => "title",
        StandardTagKey::Artist => "artist",
        StandardTagKey::Album => "album",
        StandardTagKey::AlbumArtist => "album_artist",
        StandardTagKey::Genre => "genre",
        StandardTagKey::Date => "date",
        StandardTagKey::TrackNumber => "track",
        StandardTagKey::Composer => "composer",
        StandardTagKey::Comment => "comment",
        _ => return None,
    };
    Some(name)
}

/// Best-effort codec label used for track info.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
