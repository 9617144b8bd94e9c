//! Fixtures shared by the pipeline and engine tests.

use std::path::PathBuf;

pub(crate) const WAV_RATE: u32 = 8_000;

/// Write a mono 16-bit PCM sine of `seconds` to the temp dir.
pub(crate) fn write_wav(name: &str, seconds: f64) -> PathBuf {
    let frames = (WAV_RATE as f64 * seconds).round() as u32;
    let data_len = frames * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&WAV_RATE.to_le_bytes());
    bytes.extend_from_slice(&(WAV_RATE * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let phase = (i % 40) as f32 / 40.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 8_000.0) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let path = std::env::temp_dir().join(format!(
        "playback-engine-{}-{name}.wav",
        std::process::id()
    ));
    std::fs::write(&path, bytes).unwrap();
    path
}
