use crossbeam_channel::{Receiver, Sender};

/// Events relayed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    /// New duration estimate in milliseconds.
    DurationChanged(u64),
    /// Playback reached the end of the file or selection; the engine is paused.
    EndOfStream,
    /// Fatal pipeline error; the engine is closed.
    Error(String),
}

/// Typed observer list. Subscribers that dropped their receiver are pruned on emit.
#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Vec<Sender<PlayerEvent>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: PlayerEvent) {
        tracing::debug!(?event, subscribers = self.senders.len(), "emit");
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_events() {
        let mut subs = Subscribers::default();
        let a = subs.subscribe();
        let b = subs.subscribe();
        subs.emit(PlayerEvent::EndOfStream);
        assert_eq!(a.try_recv().unwrap(), PlayerEvent::EndOfStream);
        assert_eq!(b.try_recv().unwrap(), PlayerEvent::EndOfStream);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut subs = Subscribers::default();
        let kept = subs.subscribe();
        drop(subs.subscribe());
        subs.emit(PlayerEvent::DurationChanged(1_000));
        assert_eq!(subs.senders.len(), 1);
        assert_eq!(kept.try_recv().unwrap(), PlayerEvent::DurationChanged(1_000));
    }
}
