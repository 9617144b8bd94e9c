//! Output device selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// An output device with the stream configuration chosen for one session.
pub(crate) struct DeviceOutput {
    pub(crate) device: cpal::Device,
    pub(crate) name: String,
    pub(crate) sample_format: cpal::SampleFormat,
    pub(crate) stream_config: cpal::StreamConfig,
}

impl DeviceOutput {
    /// Pick the device matching `needle` (or the default) and a config close to `target_rate`.
    pub(crate) fn select(needle: Option<&str>, target_rate: Option<u32>) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, needle)?;
        let name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let config = pick_output_config(&device, target_rate)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }
        Ok(Self {
            device,
            name,
            sample_format: config.sample_format(),
            stream_config,
        })
    }

    pub(crate) fn rate(&self) -> u32 {
        self.stream_config.sample_rate
    }

    pub(crate) fn channels(&self) -> usize {
        self.stream_config.channels as usize
    }
}

/// Names of the available output devices, in host order.
pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.name().to_string());
    }
    Ok(names)
}

/// First output device whose name contains `needle` (case-insensitive), or the default device.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|desc| matches_device_name(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose the supported config closest to `target_rate`.
///
/// Prefers the highest rate not above the target, then the lowest rate above
/// it; ties go to the better sample format. Without a target the highest rate wins.
fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = rate_within(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            at_or_below: target_rate.is_none_or(|t| rate <= t),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size if the device advertises a range, capped at 16k frames.
fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    at_or_below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.at_or_below != other.at_or_below {
            return self.at_or_below;
        }
        if self.rate != other.rate {
            return if self.at_or_below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format_rank < other.format_rank
    }
}

fn rate_within(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(at_or_below: bool, rate: u32, format_rank: u8) -> Candidate {
        Candidate {
            at_or_below,
            rate,
            format_rank,
        }
    }

    #[test]
    fn device_name_match_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", " USB "));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn rate_within_clamps_to_range() {
        assert_eq!(rate_within(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(rate_within(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(rate_within(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(rate_within(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidates_prefer_rates_at_or_below_target() {
        assert!(candidate(true, 44_100, 2).beats(&candidate(false, 48_000, 0)));
        assert!(candidate(true, 48_000, 2).beats(&candidate(true, 44_100, 2)));
        // Above the target, closer is better.
        assert!(candidate(false, 48_000, 2).beats(&candidate(false, 96_000, 2)));
        assert!(candidate(true, 48_000, 0).beats(&candidate(true, 48_000, 2)));
    }

    #[test]
    fn float_output_ranks_first() {
        assert!(
            sample_format_rank(cpal::SampleFormat::F32)
                < sample_format_rank(cpal::SampleFormat::I16)
        );
    }
}
