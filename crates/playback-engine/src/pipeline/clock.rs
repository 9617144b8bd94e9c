use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Which way media time runs during a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Reverse,
}

/// Playback clock for one streaming session.
///
/// Position is `start ± played_frames * speed / sink_rate`, counting down when
/// the session plays in reverse. Speed and direction are fixed for the
/// lifetime of a session; changing either goes through a flushing seek.
#[derive(Debug)]
pub(crate) struct PlaybackClock {
    start_ms: u64,
    speed: f64,
    direction: Direction,
    sink_rate: AtomicU32,
    played_frames: AtomicU64,
    prerolled: AtomicBool,
}

impl PlaybackClock {
    pub(crate) fn new(start_ms: u64, speed: f64, direction: Direction) -> Self {
        Self {
            start_ms,
            speed,
            direction,
            sink_rate: AtomicU32::new(0),
            played_frames: AtomicU64::new(0),
            prerolled: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_sink_rate(&self, rate_hz: u32) {
        self.sink_rate.store(rate_hz, Ordering::Release);
    }

    pub(crate) fn add_played(&self, frames: u64) {
        self.played_frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Mark the first audio consumed by the sink. Returns `true` the first time.
    pub(crate) fn mark_prerolled(&self) -> bool {
        !self.prerolled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_prerolled(&self) -> bool {
        self.prerolled.load(Ordering::Acquire)
    }

    pub(crate) fn position_ms(&self) -> u64 {
        let rate = self.sink_rate.load(Ordering::Acquire);
        if rate == 0 {
            return self.start_ms;
        }
        let frames = self.played_frames.load(Ordering::Relaxed) as f64;
        let media_ms = (frames * self.speed * 1000.0 / rate as f64).round() as u64;
        match self.direction {
            Direction::Forward => self.start_ms.saturating_add(media_ms),
            Direction::Reverse => self.start_ms.saturating_sub(media_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_start_until_sink_negotiates() {
        let clock = PlaybackClock::new(1_500, 1.0, Direction::Forward);
        clock.add_played(48_000);
        assert_eq!(clock.position_ms(), 1_500);
    }

    #[test]
    fn position_scales_played_frames_by_speed() {
        let clock = PlaybackClock::new(10_000, 0.5, Direction::Forward);
        clock.set_sink_rate(48_000);
        clock.add_played(96_000);
        assert_eq!(clock.position_ms(), 11_000);
    }

    #[test]
    fn reverse_position_counts_down_and_stops_at_zero() {
        let clock = PlaybackClock::new(3_000, 2.0, Direction::Reverse);
        clock.set_sink_rate(8_000);
        clock.add_played(4_000);
        assert_eq!(clock.position_ms(), 2_000);
        clock.add_played(16_000);
        assert_eq!(clock.position_ms(), 0);
    }

    #[test]
    fn preroll_reports_first_transition_only() {
        let clock = PlaybackClock::new(0, 1.0, Direction::Forward);
        assert!(!clock.is_prerolled());
        assert!(clock.mark_prerolled());
        assert!(!clock.mark_prerolled());
        assert!(clock.is_prerolled());
    }
}
