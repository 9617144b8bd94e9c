//! Sink stage: the end of the pipeline.
//!
//! Both sinks drain the last queue, advance the session clock, post
//! `AsyncDone` when they consume their first audio, and post `Eos` once the
//! queue is closed and empty.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::StreamTrait;

use crate::bus::{BusMessage, BusSender, Stage};
use crate::pipeline::clock::PlaybackClock;
use crate::queue::{PopStrategy, SampleQueue};
use crate::volume::VolumeControl;

pub(crate) mod device;
mod output;

pub(crate) use device::DeviceOutput;

/// State the sink shares with the rest of the session.
pub(crate) struct SinkShared {
    pub(crate) queue: Arc<SampleQueue>,
    pub(crate) clock: Arc<PlaybackClock>,
    pub(crate) volume: VolumeControl,
    pub(crate) paused: Arc<AtomicBool>,
    pub(crate) cancel: Arc<AtomicBool>,
    /// Set once the sink has posted `Eos`; its thread has exited by then.
    pub(crate) finished: Arc<AtomicBool>,
    pub(crate) bus: BusSender,
}

impl SinkShared {
    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.bus.post(BusMessage::Eos);
    }
}

/// How long the device keeps playing what it already pulled before `Eos`.
const DEVICE_TAIL: Duration = Duration::from_millis(100);

const NULL_TICK: Duration = Duration::from_millis(10);

/// Run a CPAL stream on `output` until the queue drains or the session is cancelled.
///
/// The stream is created and dropped on the sink thread.
pub(crate) fn spawn_device_sink(
    output: DeviceOutput,
    shared: Arc<SinkShared>,
    refill_max_frames: usize,
) -> JoinHandle<()> {
    thread::spawn(move || {
        shared.clock.set_sink_rate(output.rate());
        let stream = match output::build_output_stream(&output, shared.clone(), refill_max_frames)
            .and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
            Ok(stream) => stream,
            Err(e) => {
                shared.bus.error(Stage::Sink, format!("{e:#}"));
                shared.queue.close();
                return;
            }
        };
        tracing::debug!(
            device = %output.name,
            rate_hz = output.rate(),
            channels = output.channels(),
            "output stream started"
        );

        if shared.queue.wait_until_drained_or_cancel(&shared.cancel) {
            // A paused stream still holds the last pull; end only once it plays out.
            while shared.paused.load(Ordering::Relaxed) && !shared.cancel.load(Ordering::Relaxed) {
                thread::sleep(NULL_TICK);
            }
            thread::sleep(DEVICE_TAIL);
            if !shared.cancel.load(Ordering::Relaxed) {
                shared.finish();
            }
        }
        drop(stream);
    })
}

/// Consume the queue in real time at `rate_hz` without producing sound.
pub(crate) fn spawn_null_sink(shared: Arc<SinkShared>, rate_hz: u32) -> JoinHandle<()> {
    thread::spawn(move || {
        shared.clock.set_sink_rate(rate_hz);
        let frames_per_tick = (rate_hz as usize / 100).max(1);
        let mut next_tick = Instant::now();

        loop {
            if shared.cancel.load(Ordering::Relaxed) {
                return;
            }
            if shared.paused.load(Ordering::Relaxed) {
                thread::sleep(NULL_TICK);
                next_tick = Instant::now();
                continue;
            }

            match shared.queue.pop(PopStrategy::NonBlocking {
                max_frames: frames_per_tick,
            }) {
                Some(samples) => {
                    let frames = samples.len() / shared.queue.channels();
                    shared.clock.add_played(frames as u64);
                    if shared.clock.mark_prerolled() {
                        shared.bus.post(BusMessage::AsyncDone);
                    }
                }
                None if shared.queue.is_done() && shared.queue.len_frames() == 0 => {
                    shared.finish();
                    return;
                }
                None => {}
            }

            next_tick += NULL_TICK;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                next_tick = now;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::pipeline::clock::Direction;

    fn shared(bus: &Bus, queue: Arc<SampleQueue>) -> Arc<SinkShared> {
        Arc::new(SinkShared {
            queue,
            clock: Arc::new(PlaybackClock::new(1_000, 1.0, Direction::Forward)),
            volume: VolumeControl::default(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            bus: bus.sender(),
        })
    }

    #[test]
    fn null_sink_plays_then_reports_eos() {
        let bus = Bus::new();
        let queue = Arc::new(SampleQueue::new(2, 1 << 16));
        queue.push_interleaved_blocking(&vec![0.0; 2 * 800]);
        queue.close();

        let shared = shared(&bus, queue);
        spawn_null_sink(shared.clone(), 8_000).join().unwrap();

        assert_eq!(bus.try_pop(), Some(BusMessage::AsyncDone));
        assert_eq!(bus.try_pop(), Some(BusMessage::Eos));
        assert_eq!(shared.clock.position_ms(), 1_100);
        assert!(shared.finished.load(Ordering::Acquire));
    }

    #[test]
    fn null_sink_holds_position_while_paused() {
        let bus = Bus::new();
        let queue = Arc::new(SampleQueue::new(1, 1 << 16));
        queue.push_interleaved_blocking(&vec![0.0; 8_000]);

        let shared = shared(&bus, queue);
        shared.paused.store(true, Ordering::Relaxed);
        let handle = spawn_null_sink(shared.clone(), 8_000);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(shared.clock.position_ms(), 1_000);
        assert!(!shared.clock.is_prerolled());
        assert!(!shared.finished.load(Ordering::Acquire));

        shared.cancel.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(bus.try_pop().is_none());
    }
}
