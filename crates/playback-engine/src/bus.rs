//! Pipeline status bus.
//!
//! Stage threads post [`BusMessage`]s tagged with the generation of the session
//! that produced them. The owner drains the bus from its own thread and drops
//! anything posted by a session that has since been flushed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Pipeline stage that posted a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Source,
    Decoder,
    Resampler,
    Sink,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Decoder => "decoder",
            Stage::Resampler => "resampler",
            Stage::Sink => "sink",
        }
    }
}

/// Status messages posted by the streaming threads.
#[derive(Clone, Debug, PartialEq)]
pub enum BusMessage {
    /// The stored duration estimate changed; query the pipeline for the value.
    DurationChanged,
    /// The sink consumed its first audio while the pipeline targets playing.
    AsyncDone,
    /// The last queue drained normally.
    Eos,
    /// Fatal stage failure.
    Error { stage: Stage, message: String },
}

#[derive(Clone, Debug)]
pub(crate) struct Envelope {
    pub(crate) generation: u64,
    pub(crate) message: BusMessage,
}

/// Outcome of waiting on the bus.
#[derive(Debug, PartialEq)]
pub(crate) enum Wait {
    Message(BusMessage),
    TimedOut,
    Disconnected,
}

/// Receiving side of the bus, owned by the pipeline.
pub(crate) struct Bus {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    generation: Arc<AtomicU64>,
}

impl Bus {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Retire every sender handed out so far and return the new generation.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Posting handle bound to the current generation.
    pub(crate) fn sender(&self) -> BusSender {
        BusSender {
            tx: self.tx.clone(),
            generation: self.generation(),
        }
    }

    fn is_current(&self, envelope: &Envelope) -> bool {
        let current = self.generation();
        if envelope.generation != current {
            tracing::trace!(
                stale = envelope.generation,
                current,
                message = ?envelope.message,
                "dropping stale bus message"
            );
            return false;
        }
        true
    }

    /// Next current-generation message, without blocking.
    pub(crate) fn try_pop(&self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if self.is_current(&envelope) => return Some(envelope.message),
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Wait for the next current-generation message, optionally until `deadline`.
    pub(crate) fn pop_until(&self, deadline: Option<Instant>) -> Wait {
        loop {
            let received = match deadline {
                Some(deadline) => self.rx.recv_deadline(deadline),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(envelope) if self.is_current(&envelope) => return Wait::Message(envelope.message),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Wait::TimedOut,
                Err(RecvTimeoutError::Disconnected) => return Wait::Disconnected,
            }
        }
    }
}

/// Posting side handed to stage threads.
#[derive(Clone, Debug)]
pub struct BusSender {
    tx: Sender<Envelope>,
    generation: u64,
}

impl BusSender {
    pub fn post(&self, message: BusMessage) {
        let _ = self.tx.send(Envelope {
            generation: self.generation,
            message,
        });
    }

    pub fn error(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stage = stage.name(), error = %message, "pipeline error");
        self.post(BusMessage::Error { stage, message });
    }
}
