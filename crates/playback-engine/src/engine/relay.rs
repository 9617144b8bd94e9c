use std::time::{Duration, Instant};

use super::Engine;
use crate::bus::{BusMessage, Wait};
use crate::events::PlayerEvent;
use crate::pipeline::PipelineState;
use crate::pipeline::clock::Direction;
use crate::status::EngineState;

impl Engine {
    /// Relay every queued pipeline message without blocking. Returns how many were handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.pipeline.pop_message() {
            self.relay(message);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for a pipeline message, then relay everything queued.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        match self.pipeline.wait_message(Some(Instant::now() + timeout)) {
            Wait::Message(message) => {
                self.relay(message);
                1 + self.dispatch_pending()
            }
            Wait::TimedOut | Wait::Disconnected => 0,
        }
    }

    fn relay(&mut self, message: BusMessage) {
        if !self.is_ready() {
            tracing::trace!(?message, state = ?self.state, "bus message ignored");
            return;
        }
        match message {
            BusMessage::DurationChanged => {
                let Some(duration) = self.pipeline.query_duration() else {
                    return;
                };
                if self.duration == Some(duration) {
                    return;
                }
                self.duration = Some(duration);
                tracing::debug!(duration_ms = duration, "duration changed");
                self.subscribers.emit(PlayerEvent::DurationChanged(duration));
            }
            BusMessage::Eos => {
                let direction = self.pipeline.direction();
                self.pipeline.set_state(PipelineState::Paused);
                self.state = EngineState::Paused;
                // The finished session is replaced by a paused one sitting exactly
                // on the edge it ran into; playing again reaches the end at once.
                if let Some((start, end)) = self.bounds() {
                    let edge = match direction {
                        Direction::Forward => end,
                        Direction::Reverse => start,
                    };
                    let position = self.pipeline.query_position();
                    if position != Some(edge) {
                        tracing::debug!(?position, edge_ms = edge, "correcting end-of-stream position");
                    }
                    self.seek_unchecked(edge);
                }
                tracing::info!(uri = self.uri.as_deref().unwrap_or_default(), "end of stream");
                self.subscribers.emit(PlayerEvent::EndOfStream);
            }
            BusMessage::Error { stage, message } => {
                tracing::error!(stage = stage.name(), error = %message, "playback failed");
                self.pipeline.set_state(PipelineState::Null);
                self.clear_source();
                self.subscribers
                    .emit(PlayerEvent::Error(format!("{}: {message}", stage.name())));
            }
            BusMessage::AsyncDone => {}
        }
    }
}
