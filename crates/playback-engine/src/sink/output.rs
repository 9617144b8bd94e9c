//! CPAL output stream.
//!
//! The callback:
//! - outputs silence without draining the queue while paused
//! - refills a small local buffer from the queue without blocking
//! - maps source channels onto device channels
//! - applies the volume gain and converts to the device sample format
//! - advances the playback clock and reports preroll

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::SinkShared;
use crate::bus::{BusMessage, BusSender, Stage};
use crate::queue::PopStrategy;

/// Build an output stream on `output` that plays `shared.queue`.
pub(crate) fn build_output_stream(
    output: &super::device::DeviceOutput,
    shared: Arc<SinkShared>,
    refill_max_frames: usize,
) -> Result<cpal::Stream> {
    match output.sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(output, shared, refill_max_frames),
        cpal::SampleFormat::I16 => build_stream::<i16>(output, shared, refill_max_frames),
        cpal::SampleFormat::I32 => build_stream::<i32>(output, shared, refill_max_frames),
        cpal::SampleFormat::U16 => build_stream::<u16>(output, shared, refill_max_frames),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    output: &super::device::DeviceOutput,
    shared: Arc<SinkShared>,
    refill_max_frames: usize,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = output.channels().max(1);
    let refill_max_frames = refill_max_frames.max(1);
    let state = Mutex::new(Refill {
        pos: 0,
        src_channels: shared.queue.channels(),
        src: Vec::new(),
    });
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let bus = shared.bus.clone();
    let reported = AtomicBool::new(false);
    let err_fn = move |err: cpal::StreamError| report_stream_error(&bus, &reported, &err);

    let stream = output.device.build_output_stream(
        &output.stream_config,
        move |data: &mut [T], _| {
            if shared.paused.load(Ordering::Relaxed) || shared.cancel.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
            let gain = shared.volume.gain();
            let frames = data.len() / channels_out;
            let mut filled_frames = 0usize;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match shared.queue.pop(PopStrategy::NonBlocking {
                        max_frames: refill_max_frames,
                    }) {
                        Some(v) => st.src = v,
                        None => {
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = st.mapped_sample(channels_out, ch) * gain;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
                filled_frames += 1;
            }

            if filled_frames > 0 {
                shared.clock.add_played(filled_frames as u64);
                if shared.clock.mark_prerolled() {
                    shared.bus.post(BusMessage::AsyncDone);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Post the first stream failure to the bus; later ones are only logged.
fn report_stream_error(bus: &BusSender, reported: &AtomicBool, err: &dyn Display) {
    if reported.swap(true, Ordering::AcqRel) {
        tracing::debug!("further stream error: {err}");
        return;
    }
    bus.error(Stage::Sink, format!("output stream: {err}"));
}

/// Samples fetched from the queue but not yet written to the device.
struct Refill {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl Refill {
    /// Next output sample for `dst_ch`; advances one source frame after the last channel.
    ///
    /// Mono is duplicated, stereo folded to mono by averaging, other layouts
    /// clamp to the last available source channel.
    fn mapped_sample(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.pos >= self.src.len() {
            return 0.0;
        }
        let frame = &self.src[self.pos..(self.pos + self.src_channels).min(self.src.len())];
        let get = |ch: usize| frame.get(ch).copied().unwrap_or(0.0);

        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };

        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}
