use super::{Engine, Selection};
use crate::pipeline::PipelineState;
use crate::pipeline::clock::Direction;
use crate::status::EngineState;
use crate::tempo::{self, MAX_SPEED, MIN_SPEED};
use crate::timefmt;

impl Engine {
    pub fn play(&mut self) {
        if !self.is_ready() {
            tracing::debug!(state = ?self.state, "play ignored");
            return;
        }
        self.pipeline.set_state(PipelineState::Playing);
        self.state = EngineState::Playing;
    }

    pub fn pause(&mut self) {
        if !self.is_ready() {
            tracing::debug!(state = ?self.state, "pause ignored");
            return;
        }
        self.pipeline.set_state(PipelineState::Paused);
        self.state = EngineState::Paused;
    }

    /// Pause, then jump back by the configured rewind distance.
    pub fn pause_and_rewind(&mut self) {
        self.pause();
        let rewind = self.config.rewind_on_pause_ms;
        if rewind > 0 {
            self.seek_relative(-(rewind.min(i64::MAX as u64) as i64));
        }
    }

    /// Play forwards from the current position at `speed` to the end of the
    /// playable range. The commanded speed is kept; the next seek or speed
    /// change returns to it.
    pub fn fast_forward(&mut self, speed: f64) {
        if !speed.is_finite() || speed <= 0.0 {
            tracing::warn!(speed, "invalid fast-forward speed");
            return;
        }
        self.trick_play(speed, Direction::Forward);
    }

    /// Play backwards from the current position at `|speed|` down to the start
    /// of the playable range.
    pub fn rewind(&mut self, speed: f64) {
        if !speed.is_finite() || speed == 0.0 {
            tracing::warn!(speed, "invalid rewind speed");
            return;
        }
        self.trick_play(speed.abs(), Direction::Reverse);
    }

    /// Seek to `ms`. Rejected when outside the playable range or the duration is unknown.
    pub fn seek(&mut self, ms: i64) {
        let Some((start, end)) = self.bounds() else {
            tracing::debug!(ms, "seek ignored, no duration");
            return;
        };
        if ms < 0 || (ms as u64) < start || (ms as u64) > end {
            tracing::debug!(ms, start, end, "seek out of range");
            return;
        }
        self.seek_unchecked(ms as u64);
    }

    /// Seek by `delta_ms` from the current position, clamped to the playable range.
    pub fn seek_relative(&mut self, delta_ms: i64) {
        let (Some((start, end)), Some(pos)) = (self.bounds(), self.query_position()) else {
            tracing::debug!(delta_ms, "relative seek ignored");
            return;
        };
        let target = (pos as i128 + delta_ms as i128).clamp(start as i128, end as i128);
        self.seek_unchecked(target as u64);
    }

    /// Seek to `permille` thousandths of the duration.
    pub fn seek_fraction(&mut self, permille: u32) {
        if permille > 1000 {
            tracing::debug!(permille, "fraction out of range");
            return;
        }
        let Some(duration) = self.query_duration() else {
            return;
        };
        let target = duration * u64::from(permille) / 1000;
        self.seek(target as i64);
    }

    /// Change the speed. The new speed takes effect through a seek to the
    /// current position; values outside `[0.1, 2.0]` are clamped.
    pub fn set_speed(&mut self, speed: f64) {
        if !speed.is_finite() || speed <= 0.0 {
            tracing::warn!(speed, "invalid speed");
            return;
        }
        let clamped = tempo::clamp_speed(speed);
        if clamped != speed {
            tracing::debug!(speed, clamped, min = MIN_SPEED, max = MAX_SPEED, "speed clamped");
        }
        self.speed = clamped;
        if let Some(pos) = self.query_position() {
            self.seek_unchecked(pos);
        }
    }

    /// Set the volume in `[0, 1]`; the mute flag is left alone.
    pub fn set_volume(&mut self, level: f64) {
        if !(0.0..=1.0).contains(&level) {
            tracing::warn!(level, "volume out of range");
            return;
        }
        self.volume_control().set_level(level);
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.volume_control().set_muted(muted);
    }

    /// Current position, or `None` when nothing is open.
    pub fn query_position(&self) -> Option<u64> {
        if !self.is_ready() {
            return None;
        }
        self.pipeline.query_position()
    }

    /// Latest duration estimate, or `None` when nothing is open.
    pub fn query_duration(&self) -> Option<u64> {
        if !self.is_ready() {
            return None;
        }
        self.pipeline.query_duration().or(self.duration)
    }

    /// Current position on a 0..=1000 scale.
    pub fn permille(&self) -> Option<u32> {
        let pos = self.query_position()?;
        let duration = self.query_duration().filter(|d| *d > 0)?;
        Some((pos.min(duration) * 1000 / duration) as u32)
    }

    /// Bound playback to `[start_ms, end_ms]`. The position moves to `start_ms`
    /// if it lies outside.
    pub fn set_selection(&mut self, start_ms: u64, end_ms: u64) {
        let Some(duration) = self.query_duration() else {
            return;
        };
        let end_ms = end_ms.min(duration);
        if start_ms >= end_ms {
            tracing::debug!(start_ms, end_ms, "empty selection rejected");
            return;
        }
        self.selection = Some(Selection { start_ms, end_ms });
        self.pipeline.set_end(Some(end_ms));

        let pos = self.query_position().unwrap_or(start_ms);
        let target = if (start_ms..=end_ms).contains(&pos) {
            pos
        } else {
            start_ms
        };
        self.seek_unchecked(target);
    }

    pub fn clear_selection(&mut self) {
        if self.selection.take().is_none() {
            return;
        }
        self.pipeline.set_end(None);
        if let Some(pos) = self.query_position() {
            self.seek_unchecked(pos);
        }
    }

    pub fn selection(&self) -> Option<(u64, u64)> {
        self.selection.map(|s| (s.start_ms, s.end_ms))
    }

    /// Format `ms` for display; see [`timefmt::time_string`].
    pub fn time_string(ms: u64, max_ms: u64, digits: u8) -> String {
        timefmt::time_string(ms, max_ms, digits)
    }

    pub fn current_time_string(&self, digits: u8) -> Option<String> {
        let pos = self.query_position()?;
        let duration = self.query_duration()?;
        Some(timefmt::time_string(pos, duration, digits))
    }

    pub fn duration_time_string(&self, digits: u8) -> Option<String> {
        let duration = self.query_duration()?;
        Some(timefmt::time_string(duration, duration, digits))
    }

    /// Timestamp for the current position in the configured format.
    pub fn timestamp(&self) -> Option<String> {
        let pos = self.query_position()?;
        let duration = self.query_duration()?;
        Some(self.timestamp_for_time(pos, duration))
    }

    pub fn timestamp_for_time(&self, ms: u64, duration_ms: u64) -> String {
        timefmt::timestamp_for_time(&self.config.timestamp, ms, duration_ms)
    }

    /// Milliseconds represented by `text`; with `check_duration`, also within the open file.
    pub fn timestamp_position(&self, text: &str, check_duration: bool) -> Option<u64> {
        let max = if check_duration {
            Some(self.query_duration()?)
        } else {
            None
        };
        timefmt::parse_timestamp(text, max)
    }

    pub fn string_is_timestamp(&self, text: &str, check_duration: bool) -> bool {
        self.timestamp_position(text, check_duration).is_some()
    }

    /// Seek to the time in `text`. Returns `false` if it is not a valid timestamp for this file.
    pub fn goto_timestamp(&mut self, text: &str) -> bool {
        match self.timestamp_position(text, true) {
            Some(ms) => {
                self.seek(ms as i64);
                true
            }
            None => false,
        }
    }

    /// `[start, end]` of the playable range: the selection, or the whole file.
    pub(super) fn bounds(&self) -> Option<(u64, u64)> {
        if let Some(sel) = self.selection {
            return Some((sel.start_ms, sel.end_ms));
        }
        self.query_duration().map(|d| (0, d))
    }

    fn trick_play(&mut self, speed: f64, direction: Direction) {
        let (Some((start, end)), Some(pos)) = (self.bounds(), self.query_position()) else {
            tracing::debug!(speed, ?direction, "trick play ignored");
            return;
        };
        let speed = tempo::clamp_speed(speed);
        let pos = pos.clamp(start, end);
        let restarted = match direction {
            Direction::Forward => self.pipeline.seek(pos, speed),
            Direction::Reverse => self.pipeline.seek_reverse(pos, start, speed),
        };
        if restarted {
            tracing::debug!(pos, speed, ?direction, "trick play");
            self.play();
        }
    }

    pub(super) fn seek_unchecked(&mut self, ms: u64) {
        if self.pipeline.seek(ms, self.speed) {
            tracing::debug!(ms, speed = self.speed, "seek");
        }
    }
}
