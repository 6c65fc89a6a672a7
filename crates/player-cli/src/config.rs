//! Optional TOML configuration file.
//!
//! Every field is optional; values given on the command line win.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use stream_player::EngineConfig;

use crate::cli::Args;

/// Player configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    /// Output device substring match.
    pub device: Option<String>,
    /// Initial volume, 0-100.
    pub volume: Option<u8>,
    /// Engine tuning.
    pub engine: Option<EngineSection>,
}

/// `[engine]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub chunk_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
    pub queue_capacity_seconds: Option<f32>,
    pub poll_interval_ms: Option<u64>,
    pub drain_poll_interval_ms: Option<u64>,
    pub max_consecutive_read_errors: Option<u32>,
}

impl PlayerConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PlayerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Build the engine config from defaults, this file, then command-line flags.
    pub fn engine_config(&self, args: &Args) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        if let Some(engine) = &self.engine {
            if let Some(v) = engine.chunk_frames {
                cfg.chunk_frames = v;
            }
            if let Some(v) = engine.buffer_seconds {
                cfg.backpressure_seconds = v;
            }
            if let Some(v) = engine.queue_capacity_seconds {
                cfg.queue_capacity_seconds = v;
            }
            if let Some(v) = engine.poll_interval_ms {
                cfg.poll_interval = Duration::from_millis(v);
            }
            if let Some(v) = engine.drain_poll_interval_ms {
                cfg.drain_poll_interval = Duration::from_millis(v);
            }
            if let Some(v) = engine.max_consecutive_read_errors {
                cfg.max_consecutive_read_errors = v;
            }
        }
        if let Some(v) = args.chunk_frames {
            cfg.chunk_frames = v;
        }
        if let Some(v) = args.buffer_seconds {
            cfg.backpressure_seconds = v;
        }
        cfg.normalized()
    }

    pub fn device(&self, args: &Args) -> Option<String> {
        args.device.clone().or_else(|| self.device.clone())
    }

    /// Initial volume as a gain in `[0, 1]`.
    pub fn volume(&self, args: &Args) -> f32 {
        let percent = args.volume.or(self.volume).unwrap_or(100).min(100);
        percent as f32 / 100.0
    }
}
