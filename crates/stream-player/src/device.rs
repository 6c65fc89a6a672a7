//! Output device discovery, selection and format negotiation.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - walking an ordered list of (device, negotiation) candidates until one opens

use std::fmt;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::DeviceError;
use crate::playback::build_output_stream;
use crate::sink::{
    OutputBackend, OutputDevice, OutputFormat, OutputRequest, OutputSink, QueueSink,
};

/// Which device a candidate refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceTarget {
    Default,
    /// Case-insensitive substring of the device name.
    Named(String),
}

/// How far a candidate may deviate from the requested format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiation {
    Exact,
    AllowRate,
    AllowRateAndChannels,
}

impl Negotiation {
    fn allows_rate_change(self) -> bool {
        !matches!(self, Negotiation::Exact)
    }

    fn allows_channel_change(self) -> bool {
        matches!(self, Negotiation::AllowRateAndChannels)
    }
}

/// One entry in the probing order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub target: DeviceTarget,
    pub negotiation: Negotiation,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            DeviceTarget::Default => write!(f, "default device ({:?})", self.negotiation),
            DeviceTarget::Named(name) => write!(f, "\"{name}\" ({:?})", self.negotiation),
        }
    }
}

/// Probing order: each target strict first, then progressively looser.
pub fn candidates(targets: &[DeviceTarget]) -> Vec<Candidate> {
    targets
        .iter()
        .flat_map(|target| {
            [
                Negotiation::Exact,
                Negotiation::AllowRate,
                Negotiation::AllowRateAndChannels,
            ]
            .into_iter()
            .map(|negotiation| Candidate {
                target: target.clone(),
                negotiation,
            })
        })
        .collect()
}

/// Return the first candidate that `attempt` opens, or every failure.
pub fn open_first<C, T, F>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, DeviceError>
where
    C: fmt::Display,
    F: FnMut(&C) -> Result<T, DeviceError>,
{
    let mut attempts = Vec::new();
    for candidate in candidates {
        match attempt(&candidate) {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                tracing::debug!(candidate = %candidate, "output candidate failed: {e}");
                attempts.push(format!("{candidate}: {e}"));
            }
        }
    }
    if attempts.is_empty() {
        return Err(DeviceError::NoDevice);
    }
    Err(DeviceError::Exhausted { attempts })
}

/// Backend that plays through CPAL's default host.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    device: Option<String>,
}

impl CpalBackend {
    /// `device` restricts probing to devices whose name contains the substring.
    pub fn new(device: Option<String>) -> Self {
        Self {
            device: device.filter(|d| !d.trim().is_empty()),
        }
    }

    fn targets(&self, host: &cpal::Host) -> Vec<DeviceTarget> {
        if let Some(name) = &self.device {
            return vec![DeviceTarget::Named(name.clone())];
        }
        let mut targets = vec![DeviceTarget::Default];
        if let Ok(names) = list_devices(host) {
            targets.extend(names.into_iter().map(DeviceTarget::Named));
        }
        targets
    }
}

impl OutputBackend for CpalBackend {
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputDevice>, DeviceError> {
        let host = cpal::default_host();
        let device = open_first(candidates(&self.targets(&host)), |candidate| {
            open_candidate(&host, candidate, request)
        })?;
        Ok(Box::new(device))
    }
}

/// An open CPAL stream and the sink feeding it. Dropping it stops the stream.
struct CpalOutput {
    _stream: cpal::Stream,
    sink: Arc<QueueSink>,
}

impl OutputDevice for CpalOutput {
    fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }
}

fn open_candidate(
    host: &cpal::Host,
    candidate: &Candidate,
    request: &OutputRequest,
) -> Result<CpalOutput, DeviceError> {
    let device = match &candidate.target {
        DeviceTarget::Default => host.default_output_device().ok_or(DeviceError::NoDevice)?,
        DeviceTarget::Named(name) => pick_device(host, Some(name.as_str()))?,
    };
    let config = pick_output_config(&device, request.format, candidate.negotiation)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buffer_size) = pick_buffer_size(&config) {
        stream_config.buffer_size = buffer_size;
    }

    let format = OutputFormat::new(stream_config.sample_rate, stream_config.channels);
    let sink = Arc::new(QueueSink::new(format, request.capacity_seconds));
    let stream = build_output_stream(&device, &stream_config, config.sample_format(), &sink)?;
    stream
        .play()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    tracing::info!(
        device = %device_label(&device),
        rate_hz = format.sample_rate,
        channels = format.channels,
        sample_format = ?config.sample_format(),
        requested_rate_hz = request.format.sample_rate,
        requested_channels = request.format.channels,
        "output device opened"
    );
    Ok(CpalOutput {
        _stream: stream,
        sink,
    })
}

fn device_label(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| DeviceError::NotMatched(e.to_string()))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(DeviceError::NotMatched(needle.to_string()));
    }

    host.default_output_device().ok_or(DeviceError::NoDevice)
}

/// Pick the best supported output config for `requested` under `negotiation`.
///
/// Matching channel counts win first; then rates at or below the request are
/// preferred (highest first), then lower-ranked sample formats.
pub fn pick_output_config(
    device: &cpal::Device,
    requested: OutputFormat,
    negotiation: Negotiation,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::NoConfig(e.to_string()))?
        .collect();
    if ranges.is_empty() {
        return Err(DeviceError::NoConfig("no supported output configs".into()));
    }

    let mut best: Option<(CandidateRank, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        if sample_format_rank(range.sample_format()) >= 10 {
            continue;
        }
        let channels_match = range.channels() == requested.channels;
        if !channels_match && !negotiation.allows_channel_change() {
            continue;
        }
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            Some(requested.sample_rate),
        );
        if rate != requested.sample_rate && !negotiation.allows_rate_change() {
            continue;
        }
        let rank = CandidateRank {
            channels_match,
            below: rate <= requested.sample_rate,
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => is_better_candidate(&rank, best_rank),
        };
        if replace {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg).ok_or_else(|| {
        DeviceError::NoConfig(format!(
            "{} Hz / {} ch not supported ({negotiation:?})",
            requested.sample_rate, requested.channels
        ))
    })
}

/// Pick a stream buffer size, preferring larger values to reduce underruns.
///
/// If the device reports a range, choose the max (capped). If `Unknown`, return `None`
/// so CPAL uses the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, in enumeration order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>, DeviceError> {
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::NotMatched(e.to_string()))?;
    Ok(devices.map(|d| device_label(&d)).collect())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CandidateRank {
    channels_match: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    let target = target_rate.unwrap_or(u32::MAX);
    if target_rate.is_some() {
        if target >= min && target <= max {
            target
        } else if target < min {
            min
        } else {
            max
        }
    } else {
        max
    }
}

/// Lower is better. `i16` ranks first since the sink queue already holds `i16`.
fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(candidate: &CandidateRank, best: &CandidateRank) -> bool {
    if candidate.channels_match != best.channels_match {
        candidate.channels_match
    } else if candidate.below != best.below {
        candidate.below
    } else if candidate.rate != best.rate {
        candidate.rate > best.rate
    } else {
        candidate.format_rank < best.format_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(channels_match: bool, below: bool, rate: u32, format_rank: u8) -> CandidateRank {
        CandidateRank {
            channels_match,
            below,
            rate,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_matching_channels() {
        assert!(is_better_candidate(
            &rank(true, false, 96_000, 3),
            &rank(false, true, 48_000, 0)
        ));
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(
            &rank(true, true, 48_000, 1),
            &rank(true, false, 48_000, 1)
        ));
    }

    #[test]
    fn is_better_candidate_prefers_higher_rate() {
        assert!(is_better_candidate(
            &rank(true, true, 96_000, 2),
            &rank(true, true, 48_000, 2)
        ));
    }

    #[test]
    fn is_better_candidate_prefers_lower_rank() {
        assert!(is_better_candidate(
            &rank(true, true, 48_000, 0),
            &rank(true, true, 48_000, 2)
        ));
    }

    #[test]
    fn negotiation_levels() {
        assert!(!Negotiation::Exact.allows_rate_change());
        assert!(Negotiation::AllowRate.allows_rate_change());
        assert!(!Negotiation::AllowRate.allows_channel_change());
        assert!(Negotiation::AllowRateAndChannels.allows_channel_change());
    }

    #[test]
    fn candidates_are_strict_first_per_target() {
        let list = candidates(&[DeviceTarget::Default, DeviceTarget::Named("dac".into())]);
        assert_eq!(list.len(), 6);
        assert_eq!(list[0].target, DeviceTarget::Default);
        assert_eq!(list[0].negotiation, Negotiation::Exact);
        assert_eq!(list[2].negotiation, Negotiation::AllowRateAndChannels);
        assert_eq!(list[3].target, DeviceTarget::Named("dac".into()));
        assert_eq!(list[3].negotiation, Negotiation::Exact);
    }

    #[test]
    fn open_first_returns_first_success() {
        let mut tried = Vec::new();
        let opened = open_first(["a", "b", "c"], |c| {
            tried.push(c.to_string());
            if *c == "b" {
                Ok(c.to_uppercase())
            } else {
                Err(DeviceError::NoConfig("nope".into()))
            }
        })
        .unwrap();
        assert_eq!(opened, "B");
        assert_eq!(tried, vec!["a", "b"]);
    }

    #[test]
    fn open_first_aggregates_failures() {
        let err = open_first(["a", "b"], |_| -> Result<(), DeviceError> {
            Err(DeviceError::NoDevice)
        })
        .unwrap_err();
        match err {
            DeviceError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("a: "));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_first_without_candidates_reports_no_device() {
        let empty: [&str; 0] = [];
        let err = open_first(empty, |_| -> Result<(), DeviceError> { Ok(()) }).unwrap_err();
        assert!(matches!(err, DeviceError::NoDevice));
    }
}
