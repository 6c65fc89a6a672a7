//! Format conversion stage.
//!
//! Converts decoded interleaved `f32` frames at the source rate and channel
//! layout into interleaved `i16` PCM at the negotiated output format.
//!
//! - channel mapping happens first (mono↔stereo, best-effort otherwise)
//! - equal rates pass straight through
//! - otherwise Rubato's sinc resampler runs over fixed-size input chunks; input
//!   that does not yet fill a chunk is held until the next call

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler as _, SincInterpolationParameters,
    SincInterpolationType, WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedFrame;
use crate::error::ResampleError;
use crate::sink::{OutputFormat, PcmBuffer};

/// Stateful converter from decoded frames to output PCM.
pub struct Resampler {
    target: OutputFormat,
    chunk_frames: usize,
    src_rate: u32,
    src_channels: usize,
    /// `None` when the source rate already matches the target.
    converter: Option<Box<dyn rubato::Resampler<f32>>>,
    /// Channel-mapped input waiting for a full chunk.
    pending: Vec<f32>,
    out_buf: Vec<f32>,
}

impl Resampler {
    /// Build a converter from `src_rate`/`src_channels` to `target`.
    pub fn new(
        src_rate: u32,
        src_channels: usize,
        target: OutputFormat,
        chunk_frames: usize,
    ) -> Result<Self, ResampleError> {
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(ResampleError::InvalidParameters(format!(
                "target {} Hz / {} ch",
                target.sample_rate, target.channels
            )));
        }
        if src_rate == 0 || src_channels == 0 {
            return Err(ResampleError::InvalidParameters(format!(
                "source {src_rate} Hz / {src_channels} ch"
            )));
        }
        let mut this = Self {
            target,
            chunk_frames: chunk_frames.max(1),
            src_rate,
            src_channels,
            converter: None,
            pending: Vec::new(),
            out_buf: Vec::new(),
        };
        this.rebuild()?;
        Ok(this)
    }

    /// Whether sample-rate conversion is active (as opposed to pass-through).
    pub fn is_resampling(&self) -> bool {
        self.converter.is_some()
    }

    /// Convert one decoded frame.
    ///
    /// May return an empty buffer while the converter is accumulating input.
    pub fn convert(&mut self, frame: &DecodedFrame) -> Result<PcmBuffer, ResampleError> {
        if frame.channels == 0 || frame.samples.is_empty() {
            return Ok(PcmBuffer::default());
        }
        if frame.sample_rate != 0
            && (frame.sample_rate != self.src_rate || frame.channels != self.src_channels)
        {
            tracing::info!(
                from_rate = self.src_rate,
                from_channels = self.src_channels,
                to_rate = frame.sample_rate,
                to_channels = frame.channels,
                "source format changed; rebuilding converter"
            );
            let tail = self.finish()?;
            self.src_rate = frame.sample_rate;
            self.src_channels = frame.channels;
            self.rebuild()?;
            let mut out = tail;
            out.extend(self.convert_mapped(frame)?);
            return Ok(out);
        }
        self.convert_mapped(frame)
    }

    /// Flush input held back for an incomplete chunk.
    pub fn finish(&mut self) -> Result<PcmBuffer, ResampleError> {
        let channels = self.target.channels as usize;
        let frames = self.pending.len() / channels;
        let Some(converter) = self.converter.as_mut() else {
            self.pending.clear();
            return Ok(PcmBuffer::default());
        };
        if frames == 0 {
            self.pending.clear();
            return Ok(PcmBuffer::default());
        }
        let produced = process_chunk(
            &mut **converter,
            &self.pending[..frames * channels],
            &mut self.out_buf,
            channels,
            frames,
            true,
        )?;
        self.pending.clear();
        Ok(PcmBuffer::new(to_i16(&self.out_buf[..produced * channels])))
    }

    /// Discard all history (pending input and filter state).
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }
    }

    fn convert_mapped(&mut self, frame: &DecodedFrame) -> Result<PcmBuffer, ResampleError> {
        let channels = self.target.channels as usize;
        let mapped = map_channels(&frame.samples, frame.channels, channels);
        let Some(converter) = self.converter.as_mut() else {
            return Ok(PcmBuffer::new(to_i16(&mapped)));
        };

        self.pending.extend_from_slice(&mapped);
        let chunk_samples = self.chunk_frames * channels;
        let mut out = Vec::new();
        let mut consumed = 0usize;
        while self.pending.len() - consumed >= chunk_samples {
            let produced = process_chunk(
                &mut **converter,
                &self.pending[consumed..consumed + chunk_samples],
                &mut self.out_buf,
                channels,
                self.chunk_frames,
                false,
            )?;
            out.extend(to_i16(&self.out_buf[..produced * channels]));
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(PcmBuffer::new(out))
    }

    fn rebuild(&mut self) -> Result<(), ResampleError> {
        self.pending.clear();
        if self.src_rate == self.target.sample_rate {
            self.converter = None;
            self.out_buf.clear();
            return Ok(());
        }

        let channels = self.target.channels as usize;
        let f_ratio = self.target.sample_rate as f64 / self.src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let converter = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            self.chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| ResampleError::Construction(e.to_string()))?;

        self.out_buf = vec![0.0f32; converter.output_frames_max() * channels];
        self.converter = Some(Box::new(converter));
        tracing::debug!(
            from_rate = self.src_rate,
            to_rate = self.target.sample_rate,
            channels,
            chunk_frames = self.chunk_frames,
            "resampler configured"
        );
        Ok(())
    }
}

/// Run one chunk through the converter. Returns the number of output frames.
fn process_chunk(
    converter: &mut dyn rubato::Resampler<f32>,
    input: &[f32],
    out_buf: &mut [f32],
    channels: usize,
    frames: usize,
    partial: bool,
) -> Result<usize, ResampleError> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| ResampleError::Process(e.to_string()))?;
    let out_capacity_frames = out_buf.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out_buf, channels, out_capacity_frames)
        .map_err(|e| ResampleError::Process(e.to_string()))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: partial.then_some(frames),
    };

    let (_nbr_in, nbr_out) = converter
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| ResampleError::Process(e.to_string()))?;
    Ok(nbr_out)
}

/// Remap interleaved samples between channel layouts.
///
/// Mapping rules:
/// - equal counts: pass-through
/// - anything → mono: average all channels
/// - mono → N: duplicate channel 0
/// - other layouts: wrap around the available source channels
fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels {
        return src.to_vec();
    }
    let frames = src.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let s = match (src_channels, dst_channels) {
                (_, 1) => frame.iter().sum::<f32>() / src_channels as f32,
                (1, _) => frame[0],
                _ => frame[ch % src_channels],
            };
            out.push(s);
        }
    }
    out
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}
