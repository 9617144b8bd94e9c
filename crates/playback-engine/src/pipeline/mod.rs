//! Pipeline graph: source → decoder → tempo → resampler → volume → sink.
//!
//! The graph is validated once at construction. Each flushing seek or state
//! change out of `Null` starts a new *session*: a fresh set of stage threads
//! and queues running from a start position at a fixed speed and direction.
//! Stopping a session cancels it, closes its queues and joins its threads;
//! anything it still posts to the bus is discarded by generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::bus::{Bus, BusMessage, BusSender, Stage, Wait};
use crate::config::{EngineConfig, SinkKind};
use crate::decode::{self, DecodeContext, DecodeParams, DurationCell, SourceFile};
use crate::error::ConstructionError;
use crate::queue::{SampleQueue, calc_max_buffered_samples};
use crate::resample::{self, ResampleConfig};
use crate::sink::{self, DeviceOutput, SinkShared};
use crate::volume::VolumeControl;

pub(crate) mod clock;

use clock::{Direction, PlaybackClock};

/// Pipeline states as driven by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PipelineState {
    Null,
    Paused,
    Playing,
}

/// Stage tuning taken from [`EngineConfig`].
#[derive(Clone, Debug)]
pub(crate) struct PipelineSettings {
    pub(crate) sink: SinkKind,
    pub(crate) device: Option<String>,
    pub(crate) chunk_frames: usize,
    pub(crate) refill_max_frames: usize,
    pub(crate) buffer_seconds: f32,
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            sink: cfg.sink,
            device: cfg.device.clone(),
            chunk_frames: cfg.chunk_frames,
            refill_max_frames: cfg.refill_max_frames,
            buffer_seconds: cfg.buffer_seconds,
        }
    }
}

struct Session {
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    clock: Arc<PlaybackClock>,
    queues: Vec<Arc<SampleQueue>>,
    threads: Vec<JoinHandle<()>>,
}

impl Session {
    fn new(start_ms: u64, speed: f64, direction: Direction, paused: bool) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(paused)),
            finished: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(PlaybackClock::new(start_ms, speed, direction)),
            queues: Vec::new(),
            threads: Vec::new(),
        }
    }

    fn stop(self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.paused.store(true, Ordering::Relaxed);
        for q in &self.queues {
            q.close();
        }
        for handle in self.threads {
            if handle.join().is_err() {
                tracing::error!("pipeline stage thread panicked");
            }
        }
    }
}

/// The single owned pipeline graph.
pub(crate) struct Pipeline {
    settings: PipelineSettings,
    bus: Bus,
    volume: VolumeControl,
    location: Option<PathBuf>,
    duration: Arc<DurationCell>,
    target: PipelineState,
    speed: f64,
    direction: Direction,
    end_ms: Option<u64>,
    /// Lower bound of reverse sessions.
    reverse_stop_ms: u64,
    session: Option<Session>,
}

impl Pipeline {
    /// Validate every stage and build an idle pipeline.
    pub(crate) fn new(
        settings: PipelineSettings,
        volume: VolumeControl,
        speed: f64,
    ) -> Result<Self, ConstructionError> {
        decode::check_codecs().map_err(|e| ConstructionError::MissingStage {
            stage: Stage::Decoder,
            reason: format!("{e:#}"),
        })?;

        resample::make_resampler(44_100, 48_000, 2, settings.chunk_frames).map_err(|e| {
            ConstructionError::MissingStage {
                stage: Stage::Resampler,
                reason: format!("{e:#}"),
            }
        })?;

        if settings.sink == SinkKind::Device {
            let output = DeviceOutput::select(settings.device.as_deref(), None).map_err(|e| {
                ConstructionError::MissingStage {
                    stage: Stage::Sink,
                    reason: format!("{e:#}"),
                }
            })?;
            tracing::info!(device = %output.name, rate_hz = output.rate(), "output device");
        }

        tracing::debug!(sink = ?settings.sink, "pipeline built");
        Ok(Self {
            settings,
            bus: Bus::new(),
            volume,
            location: None,
            duration: Arc::new(DurationCell::new()),
            target: PipelineState::Null,
            speed,
            direction: Direction::Forward,
            end_ms: None,
            reverse_stop_ms: 0,
            session: None,
        })
    }

    pub(crate) fn volume(&self) -> &VolumeControl {
        &self.volume
    }

    /// Point the source stage at `path`. Drops any running session.
    pub(crate) fn set_location(&mut self, path: &Path) {
        self.stop_session();
        self.target = PipelineState::Null;
        self.location = Some(path.to_path_buf());
        self.duration = Arc::new(DurationCell::new());
        self.direction = Direction::Forward;
        self.end_ms = None;
    }

    /// Where playback stops; `None` means end of file. Applies from the next session.
    pub(crate) fn set_end(&mut self, end_ms: Option<u64>) {
        self.end_ms = end_ms;
    }

    pub(crate) fn set_state(&mut self, state: PipelineState) {
        match state {
            PipelineState::Null => {
                self.stop_session();
                self.target = PipelineState::Null;
            }
            PipelineState::Paused | PipelineState::Playing => {
                self.target = state;
                // A session whose sink reached the end has no threads left to resume.
                let finished_at = self
                    .session
                    .as_ref()
                    .filter(|s| s.finished.load(Ordering::Acquire))
                    .map(|s| s.clock.position_ms());
                if let (PipelineState::Playing, Some(position)) = (state, finished_at) {
                    tracing::debug!(position_ms = position, "restarting finished session");
                    self.stop_session();
                    self.start_session(position);
                    return;
                }
                match &self.session {
                    Some(session) => session
                        .paused
                        .store(state == PipelineState::Paused, Ordering::Relaxed),
                    None => self.start_session(0),
                }
            }
        }
    }

    /// `Playing` is only reported once the sink has consumed audio.
    pub(crate) fn current_state(&self) -> PipelineState {
        match (&self.session, self.target) {
            (None, _) | (_, PipelineState::Null) => PipelineState::Null,
            (Some(session), PipelineState::Playing) if session.clock.is_prerolled() => {
                PipelineState::Playing
            }
            _ => PipelineState::Paused,
        }
    }

    /// Flushing, accurate seek to `ms`, playing forwards at `speed`. Fails when
    /// the pipeline is idle.
    pub(crate) fn seek(&mut self, ms: u64, speed: f64) -> bool {
        self.restart_at(ms, speed, Direction::Forward)
    }

    /// Flushing seek to `ms`, playing backwards at `speed` down to `stop_ms`.
    pub(crate) fn seek_reverse(&mut self, ms: u64, stop_ms: u64, speed: f64) -> bool {
        self.reverse_stop_ms = stop_ms;
        self.restart_at(ms, speed, Direction::Reverse)
    }

    /// Direction of the current session.
    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    fn restart_at(&mut self, ms: u64, speed: f64, direction: Direction) -> bool {
        if self.target == PipelineState::Null || self.location.is_none() {
            return false;
        }
        self.speed = speed;
        self.direction = direction;
        self.stop_session();
        self.start_session(ms);
        true
    }

    pub(crate) fn query_position(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.clock.position_ms())
    }

    pub(crate) fn query_duration(&self) -> Option<u64> {
        self.location.as_ref()?;
        self.duration.get()
    }

    pub(crate) fn pop_message(&self) -> Option<BusMessage> {
        self.bus.try_pop()
    }

    pub(crate) fn wait_message(&self, deadline: Option<Instant>) -> Wait {
        self.bus.pop_until(deadline)
    }

    #[cfg(test)]
    pub(crate) fn bus_sender(&self) -> BusSender {
        self.bus.sender()
    }

    #[cfg(test)]
    pub(crate) fn duration_cell(&self) -> &DurationCell {
        &self.duration
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn start_session(&mut self, start_ms: u64) {
        self.bus.next_generation();
        let bus = self.bus.sender();
        let mut session = Session::new(
            start_ms,
            self.speed,
            self.direction,
            self.target != PipelineState::Playing,
        );
        if let Err((stage, message)) = self.spawn_stages(&mut session, start_ms, &bus) {
            bus.error(stage, message);
        }
        self.session = Some(session);
    }

    fn spawn_stages(
        &self,
        session: &mut Session,
        start_ms: u64,
        bus: &BusSender,
    ) -> Result<(), (Stage, String)> {
        let Some(path) = self.location.as_deref() else {
            return Err((Stage::Source, "no location set".to_string()));
        };
        let file = SourceFile::open(path).map_err(|e| (Stage::Source, format!("{e:#}")))?;
        let source = decode::probe(file, path).map_err(|e| (Stage::Decoder, format!("{e:#}")))?;
        let (src_rate, channels) = (source.rate, source.channels);

        let output = match self.settings.sink {
            SinkKind::Device => Some(
                DeviceOutput::select(self.settings.device.as_deref(), Some(src_rate))
                    .map_err(|e| (Stage::Sink, format!("{e:#}")))?,
            ),
            SinkKind::Null => None,
        };
        let sink_rate = output.as_ref().map_or(src_rate, |o| o.rate());

        tracing::debug!(
            path = ?path,
            codec = source.codec.as_deref().unwrap_or("unknown"),
            rate_hz = src_rate,
            channels,
            start_ms,
            speed = self.speed,
            direction = ?self.direction,
            "starting session"
        );

        let decode_q = Arc::new(SampleQueue::new(
            channels,
            calc_max_buffered_samples(src_rate, channels, self.settings.buffer_seconds),
        ));
        session.queues.push(decode_q.clone());

        let sink_q = if sink_rate == src_rate {
            tracing::debug!(rate_hz = sink_rate, "resample skipped");
            decode_q.clone()
        } else {
            let out = Arc::new(SampleQueue::new(
                channels,
                calc_max_buffered_samples(sink_rate, channels, self.settings.buffer_seconds),
            ));
            session.queues.push(out.clone());
            session.threads.push(resample::spawn_resampler(
                decode_q.clone(),
                out.clone(),
                src_rate,
                sink_rate,
                ResampleConfig {
                    chunk_frames: self.settings.chunk_frames,
                },
                bus.clone(),
            ));
            tracing::info!(from_hz = src_rate, rate_hz = sink_rate, "resampling");
            out
        };

        session.threads.push(decode::spawn_decoder(
            source,
            DecodeParams {
                start_ms,
                end_ms: match self.direction {
                    Direction::Forward => self.end_ms,
                    Direction::Reverse => Some(self.reverse_stop_ms),
                },
                speed: self.speed,
                direction: self.direction,
            },
            DecodeContext {
                out: decode_q,
                duration: self.duration.clone(),
                bus: bus.clone(),
                cancel: session.cancel.clone(),
            },
        ));

        let shared = Arc::new(SinkShared {
            queue: sink_q,
            clock: session.clock.clone(),
            volume: self.volume.clone(),
            paused: session.paused.clone(),
            cancel: session.cancel.clone(),
            finished: session.finished.clone(),
            bus: bus.clone(),
        });
        session.threads.push(match output {
            Some(output) => {
                sink::spawn_device_sink(output, shared, self.settings.refill_max_frames)
            }
            None => sink::spawn_null_sink(shared, sink_rate),
        });
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_session();
    }
}
