use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stream-player", version)]
pub struct Args {
    /// Audio file to load and start playing immediately
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Play through a virtual device that drains on the wall clock (no audio hardware)
    #[arg(long)]
    pub null_output: bool,

    /// TOML config file; explicit flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial volume, 0-100
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Queued audio (seconds) above which decoding pauses
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}
