//! Bounded queues for interleaved audio samples.
//!
//! [`SampleQueue`] is the link between pipeline stages:
//! - decode/tempo thread → queue
//! - resampler thread → queue
//! - sink drains the last queue (non-blocking in the device callback)
//!
//! Closing a queue is how a session is flushed: blocked producers return early,
//! consumers drain what is left and then observe the end of the stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// The channel count is fixed for the lifetime of the queue. The `done` flag
/// lives under the same mutex as the samples so close/drain checks never race.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    samples: VecDeque<f32>,
    done: bool,
}

/// How a consumer wants to pop frames.
pub enum PopStrategy {
    /// Block until exactly `frames` are available; `None` if closed first.
    BlockingExact { frames: usize },
    /// Block until at least one frame is available, then take up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Take up to `max_frames` right now; `None` if nothing is buffered.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels.max(1))
}

impl SampleQueue {
    /// Create a queue holding at most `max_buffered_samples` samples.
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames right now (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue finished and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` when the queue was closed before every sample was
    /// accepted; the remainder is dropped.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.samples.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
            }
            if g.done {
                return false;
            }

            let room = self.max_buffered_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop interleaved frames using `strategy`.
    ///
    /// Returns `None` when the request cannot be satisfied: nothing buffered for
    /// [`PopStrategy::NonBlocking`], or closed and drained for the blocking variants.
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_samples = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.samples.len() < want && !g.done {
                    g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
                }
                if g.samples.len() < want {
                    return None;
                }
                want
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.samples.len() < self.channels && !g.done {
                    g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
                }
                let available = g.samples.len() / self.channels;
                if available == 0 {
                    return None;
                }
                available.min(max_frames) * self.channels
            }
            PopStrategy::NonBlocking { max_frames } => {
                let available = g.samples.len() / self.channels;
                let take = available.min(max_frames) * self.channels;
                if take == 0 {
                    return None;
                }
                take
            }
        };

        let out: Vec<f32> = g.samples.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and drained, or `cancel` becomes true.
    ///
    /// Returns `true` if the queue drained normally, `false` if cancelled.
    pub fn wait_until_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.done && g.samples.is_empty() {
                return true;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, Duration::from_millis(50))
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 192_000);
        assert_eq!(calc_max_buffered_samples(44_100, 1, 0.5), 22_050);
    }

    #[test]
    fn pop_nonblocking_empty() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop(PopStrategy::NonBlocking { max_frames: 4 }).is_none());
    }

    #[test]
    fn pop_nonblocking_returns_whole_frames() {
        let q = SampleQueue::new(2, 64);
        assert!(q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));

        let out = q.pop(PopStrategy::NonBlocking { max_frames: 2 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn pop_blocking_exact_waits_for_frames() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let consumer = q.clone();

        let handle = thread::spawn(move || {
            let out = consumer
                .pop(PopStrategy::BlockingExact { frames: 3 })
                .unwrap();
            assert_eq!(out.len(), 6);
        });

        q.push_interleaved_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_interleaved_blocking(&[0.5, 0.6]);
        handle.join().unwrap();
    }

    #[test]
    fn pop_blocking_up_to_drains_tail_after_close() {
        let q = SampleQueue::new(2, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0]);
        q.close();

        let out = q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).unwrap();
        assert_eq!(out.len(), 4);
        assert!(q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).is_none());
    }

    #[test]
    fn push_returns_false_once_closed() {
        let q = Arc::new(SampleQueue::new(1, 4));
        let producer = q.clone();

        let handle = thread::spawn(move || producer.push_interleaved_blocking(&[0.0; 16]));

        // The producer blocks on a full queue until close releases it.
        while q.len_frames() < 4 {
            thread::sleep(Duration::from_millis(1));
        }
        q.close();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn wait_until_drained_or_cancel_reports_outcome() {
        let cancel = AtomicBool::new(false);
        let q = SampleQueue::new(2, 64);
        q.close();
        assert!(q.wait_until_drained_or_cancel(&cancel));

        let busy = SampleQueue::new(2, 64);
        busy.push_interleaved_blocking(&[1.0, 1.0]);
        cancel.store(true, Ordering::Relaxed);
        assert!(!busy.wait_until_drained_or_cancel(&cancel));
    }
}
