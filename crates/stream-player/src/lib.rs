//! Single-track audio file player core.
//!
//! A [`Session`] loads one file, negotiates an output device and runs a background
//! decode worker that feeds the device while the caller drives the transport
//! (play, pause, stop, seek, volume) from its own thread.

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod session;
pub mod sink;
pub mod status;
pub mod transport;
mod worker;

pub use config::EngineConfig;
pub use decode::TrackInfo;
pub use device::CpalBackend;
pub use error::{DeviceError, LoadError, ResampleError, SinkError, SourceError, TransportError};
pub use session::Session;
pub use sink::{OutputBackend, OutputFormat, VirtualBackend};
pub use status::StatusSnapshot;
pub use transport::PlaybackState;
