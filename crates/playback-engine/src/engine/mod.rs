//! The playback engine.
//!
//! [`Engine`] owns one pipeline and one source at a time. Transport calls are
//! made from a single owner thread; pipeline status arrives on the bus and is
//! turned into [`PlayerEvent`]s when the owner calls
//! [`Engine::dispatch_pending`] or [`Engine::dispatch_timeout`].
//!
//! Calls that need an open source are no-ops while the engine is closed.

use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;

use crate::config::EngineConfig;
use crate::error::ConstructionError;
use crate::events::{PlayerEvent, Subscribers};
use crate::pipeline::{Pipeline, PipelineSettings, PipelineState};
use crate::position::{self, PositionManager, PositionStore};
use crate::status::{EngineState, EngineStatus};
use crate::tempo;
use crate::volume::VolumeControl;

mod open;
mod relay;
mod transport;

#[cfg(test)]
mod tests;

/// Playback bounds narrower than the whole file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Selection {
    start_ms: u64,
    end_ms: u64,
}

/// Media-playback engine for local files.
pub struct Engine {
    config: EngineConfig,
    pipeline: Pipeline,
    state: EngineState,
    uri: Option<String>,
    path: Option<PathBuf>,
    /// Last duration relayed or confirmed while opening.
    duration: Option<u64>,
    speed: f64,
    selection: Option<Selection>,
    positions: PositionManager,
    subscribers: Subscribers,
}

impl Engine {
    /// Engine with default configuration at `initial_speed`.
    pub fn new(initial_speed: f64) -> Result<Self, ConstructionError> {
        Self::with_config(EngineConfig {
            speed: initial_speed,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, ConstructionError> {
        let store = position::store_for(config.position_backend);
        Self::with_store(config, store)
    }

    /// Engine that keeps resume positions in `store` instead of the configured backend.
    pub fn with_store(
        config: EngineConfig,
        store: Box<dyn PositionStore>,
    ) -> Result<Self, ConstructionError> {
        let speed = tempo::clamp_speed(config.speed);
        let volume = VolumeControl::new(config.volume);
        let pipeline = Pipeline::new(PipelineSettings::from(&config), volume, speed)?;
        tracing::info!(
            speed,
            sink = ?config.sink,
            backend = ?config.position_backend,
            "engine ready"
        );
        Ok(Self {
            config,
            pipeline,
            state: EngineState::Closed,
            uri: None,
            path: None,
            duration: None,
            speed,
            selection: None,
            positions: PositionManager::new(store),
            subscribers: Subscribers::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// URI of the open source.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Local path of the open source.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File name of the open source.
    pub fn filename(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn volume(&self) -> f64 {
        self.volume_control().level()
    }

    pub fn is_muted(&self) -> bool {
        self.volume_control().is_muted()
    }

    /// Receive [`PlayerEvent`]s. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        self.subscribers.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            uri: self.uri.clone(),
            position_ms: self.query_position(),
            duration_ms: self.query_duration(),
            speed: self.speed,
            volume: self.volume(),
            muted: self.is_muted(),
            selection: self.selection.map(|s| (s.start_ms, s.end_ms)),
        }
    }

    /// Persist the position and close the current source.
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        self.save_position();
        self.pipeline.set_state(PipelineState::Null);
        self.clear_source();
        tracing::info!("closed");
    }

    fn volume_control(&self) -> &VolumeControl {
        self.pipeline.volume()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn save_position(&self) {
        if !self.is_ready() {
            return;
        }
        if let (Some(path), Some(ms)) = (self.path.as_deref(), self.query_position()) {
            self.positions.save(path, ms);
        }
    }

    fn clear_source(&mut self) {
        self.state = EngineState::Closed;
        self.uri = None;
        self.path = None;
        self.duration = None;
        self.selection = None;
        self.pipeline.set_end(None);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}
