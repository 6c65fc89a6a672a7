//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream and its real-time callback. The callback:
//! - outputs silence without draining while the sink is paused
//! - otherwise pops interleaved `i16` samples from the sink queue
//! - converts them to the device sample format and pads underruns with silence

use std::sync::Arc;

use cpal::traits::DeviceTrait;

use crate::error::DeviceError;
use crate::sink::QueueSink;

/// Build a CPAL output stream that plays audio from `sink`.
///
/// The queue already holds samples in the stream's rate and channel layout, so the
/// callback only converts sample formats.
///
/// ## Real-time constraints
/// The callback never waits on anything but the queue mutex. Underruns are filled
/// with silence and counted.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sink: &Arc<QueueSink>,
) -> Result<cpal::Stream, DeviceError> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, sink),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, sink),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, sink),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, sink),
        other => Err(DeviceError::Stream(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: &Arc<QueueSink>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let sink_cb = sink.clone();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let silence = <T as cpal::Sample>::from_sample::<i16>(0);
                if sink_cb.is_paused() {
                    data.fill(silence);
                    return;
                }
                let filled = sink_cb
                    .queue()
                    .pop_into(data, <T as cpal::Sample>::from_sample::<i16>);
                if filled < data.len() {
                    data[filled..].fill(silence);
                    if !sink_cb.queue().is_closed() {
                        sink_cb.note_underrun();
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))
}
