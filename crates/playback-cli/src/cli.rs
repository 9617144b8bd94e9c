use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PLAYBACK_GIT_SHA"),
    ", ",
    env!("PLAYBACK_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "playback", version = VERSION)]
pub struct Args {
    /// Audio file or file:// URI to open
    #[arg(required_unless_present = "list_devices")]
    pub file: Option<String>,

    /// TOML engine config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Discard audio in real time instead of opening a device
    #[arg(long)]
    pub null_sink: bool,

    /// Initial playback speed (0.1 - 2.0)
    #[arg(long)]
    pub speed: Option<f64>,

    /// Initial volume (0.0 - 1.0)
    #[arg(long)]
    pub volume: Option<f64>,

    /// Start playing right after the file opens
    #[arg(long)]
    pub autoplay: bool,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long)]
    pub refill_max_frames: Option<usize>,

    /// Queue buffer target in seconds (per stage)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}
