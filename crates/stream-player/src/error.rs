//! Error types for loading, transport control and the component seams.

use std::path::PathBuf;

/// Why [`Session::load`](crate::session::Session::load) failed.
///
/// A failed load always leaves the session without a track.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("no audio stream found")]
    NoAudioStream,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("codec initialization failed: {0}")]
    CodecInitFailed(String),

    #[error("resampler initialization failed: {0}")]
    ResamplerInitFailed(#[from] ResampleError),

    #[error("output device unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),
}

/// Why a transport call was refused.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no track loaded")]
    NoTrack,

    #[error("not playing")]
    NotPlaying,

    #[error("invalid seek target: {0}")]
    InvalidSeekTarget(f64),

    #[error("failed to spawn decode worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Packet-level failures reported by the decoder adapter.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("packet read failed: {0}")]
    Read(#[source] symphonia::core::errors::Error),

    #[error("decode failed: {0}")]
    Decode(#[source] symphonia::core::errors::Error),

    #[error("seek failed: {0}")]
    Seek(#[source] symphonia::core::errors::Error),
}

/// Failures opening an output device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no output device available")]
    NoDevice,

    #[error("no output device matched: {0}")]
    NotMatched(String),

    #[error("no usable output config: {0}")]
    NoConfig(String),

    #[error("failed to build output stream: {0}")]
    Stream(String),

    #[error("all output candidates failed: {}", .attempts.join("; "))]
    Exhausted { attempts: Vec<String> },
}

/// Failures pushing PCM into an output sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("output sink closed")]
    Closed,

    #[error("output queue full ({queued} bytes queued)")]
    Full { queued: usize },
}

/// Failures building or running the sample-rate converter.
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("invalid conversion parameters: {0}")]
    InvalidParameters(String),

    #[error("resampler construction failed: {0}")]
    Construction(String),

    #[error("resampler processing failed: {0}")]
    Process(String),
}
