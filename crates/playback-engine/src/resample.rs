//! Streaming resample stage.
//!
//! Uses Rubato to convert interleaved `f32` audio from the source rate to the
//! sink rate. Runs in a background thread between two bounded [`SampleQueue`]s.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::bus::{BusSender, Stage};
use crate::queue::{PopStrategy, SampleQueue};

/// Configuration for the streaming resampler stage.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResampleConfig {
    /// Input chunk size in frames used for the steady-state loop.
    pub(crate) chunk_frames: usize,
}

/// Build the sinc resampler used by the stage.
pub(crate) fn make_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    chunk_frames: usize,
) -> Result<Async<f32>> {
    if src_rate == 0 || dst_rate == 0 {
        return Err(anyhow!("invalid rates {src_rate} -> {dst_rate}"));
    }
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_frames.max(1),
        channels.max(1),
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init: {e}"))
}

/// Start a background resampler thread reading `srcq` and writing `dstq`.
///
/// When `srcq` closes and its tail is processed, `dstq` is closed. Failures are
/// posted to the bus and also close `dstq`.
pub(crate) fn spawn_resampler(
    srcq: Arc<SampleQueue>,
    dstq: Arc<SampleQueue>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
    bus: BusSender,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = resample_loop(&srcq, &dstq, src_rate, dst_rate, cfg) {
            bus.error(Stage::Resampler, format!("{e:#}"));
        }
        dstq.close();
    })
}

fn resample_loop(
    srcq: &SampleQueue,
    dstq: &SampleQueue,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<()> {
    let channels = srcq.channels();
    let chunk_in_frames = cfg.chunk_frames.max(1);
    let mut resampler = make_resampler(src_rate, dst_rate, channels, chunk_in_frames)?;

    let mut out_interleaved = vec![0.0f32; channels * chunk_in_frames * 3];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    while let Some(interleaved) = srcq.pop(PopStrategy::BlockingExact {
        frames: chunk_in_frames,
    }) {
        indexing.partial_len = None;
        let produced = process_chunk(
            &mut resampler,
            &interleaved,
            &mut out_interleaved,
            channels,
            &indexing,
        )?;
        if !dstq.push_interleaved_blocking(&out_interleaved[..produced]) {
            return Ok(());
        }
    }

    // Closed with less than a chunk left: feed the tail as a partial chunk.
    while let Some(tail) = srcq.pop(PopStrategy::BlockingUpTo {
        max_frames: chunk_in_frames,
    }) {
        let tail_frames = tail.len() / channels;
        if tail_frames == 0 {
            continue;
        }
        let mut padded = tail;
        padded.resize(chunk_in_frames * channels, 0.0);
        indexing.partial_len = Some(tail_frames);
        let produced = process_chunk(
            &mut resampler,
            &padded,
            &mut out_interleaved,
            channels,
            &indexing,
        )?;
        if produced > 0 && !dstq.push_interleaved_blocking(&out_interleaved[..produced]) {
            return Ok(());
        }
    }
    Ok(())
}

/// Run one chunk through the resampler. Returns the number of output samples.
fn process_chunk(
    resampler: &mut Async<f32>,
    input: &[f32],
    output: &mut [f32],
    channels: usize,
    indexing: &Indexing,
) -> Result<usize> {
    let in_frames = input.len() / channels;
    let input_adapter = InterleavedSlice::new(input, channels, in_frames)
        .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

    let out_capacity_frames = output.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(output, channels, out_capacity_frames)
        .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(indexing))
        .map_err(|e| anyhow!("resampler process: {e}"))?;
    Ok(nbr_out * channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    #[test]
    fn make_resampler_rejects_zero_rate() {
        assert!(make_resampler(0, 48_000, 2, 1024).is_err());
        assert!(make_resampler(44_100, 48_000, 2, 1024).is_ok());
    }

    #[test]
    fn resampler_thread_converts_rate_and_closes() {
        let bus = Bus::new();
        let srcq = Arc::new(SampleQueue::new(1, 1 << 20));
        let dstq = Arc::new(SampleQueue::new(1, 1 << 20));

        let input: Vec<f32> = (0..44_100).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect();
        srcq.push_interleaved_blocking(&input);
        srcq.close();

        let handle = spawn_resampler(
            srcq,
            dstq.clone(),
            44_100,
            48_000,
            ResampleConfig { chunk_frames: 1024 },
            bus.sender(),
        );
        handle.join().unwrap();

        assert!(dstq.is_done());
        let frames = dstq.len_frames() as i64;
        // One second in, roughly one second out (minus resampler delay).
        assert!((frames - 48_000).abs() < 2_048, "frames {frames}");
        assert!(bus.try_pop().is_none());
    }
}
