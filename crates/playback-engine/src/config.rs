use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::timefmt::TimestampFormat;

/// Where decoded audio ends up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// CPAL output device.
    #[default]
    Device,
    /// Paced sink that discards audio in real time (headless hosts, tests).
    Null,
}

/// Where resume positions are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBackend {
    /// Extended attribute on the media file.
    #[default]
    Xattr,
    /// Custom item in the file's primary tag.
    Tags,
    None,
}

/// Engine configuration, usually loaded from TOML and overridden from the command line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial commanded speed.
    pub speed: f64,
    /// Initial volume in `[0, 1]`.
    pub volume: f64,
    pub sink: SinkKind,
    /// Substring match on the output device name; default device when unset.
    pub device: Option<String>,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for each stage queue.
    pub buffer_seconds: f32,
    /// Bound on duration discovery while opening; 0 waits forever.
    pub open_timeout_ms: u64,
    /// How far `pause_and_rewind` jumps back.
    pub rewind_on_pause_ms: u64,
    pub position_backend: PositionBackend,
    pub timestamp: TimestampFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            volume: 1.0,
            sink: SinkKind::Device,
            device: None,
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            open_timeout_ms: 30_000,
            rewind_on_pause_ms: 0,
            position_backend: PositionBackend::Xattr,
            timestamp: TimestampFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Load an engine config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<EngineConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn open_timeout(&self) -> Option<Duration> {
        (self.open_timeout_ms > 0).then(|| Duration::from_millis(self.open_timeout_ms))
    }
}
