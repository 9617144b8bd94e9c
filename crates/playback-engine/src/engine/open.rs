//! Blocking open with duration discovery.
//!
//! The pipeline is driven straight to playing, muted, and the bus is drained
//! on the calling thread until a duration is known while the sink is playing,
//! an error is posted, or the configured deadline passes.

use std::path::PathBuf;
use std::time::Instant;

use super::Engine;
use crate::bus::{BusMessage, Wait};
use crate::error::OpenError;
use crate::pipeline::PipelineState;
use crate::status::EngineState;

impl Engine {
    /// Open `locator` (a `file://` URI or a local path) and pause at its resume position.
    ///
    /// A locator that does not name an existing local file fails with
    /// [`OpenError::ResourceNotFound`] before anything else happens, so the
    /// previous source stays open. Otherwise the previous source is closed
    /// first, saving its position, and any later failure leaves the engine
    /// closed.
    pub fn open(&mut self, locator: &str) -> Result<(), OpenError> {
        let volume = self.volume_control().clone();
        let was_muted = volume.is_muted();
        volume.set_muted(true);

        let result = self.open_muted(locator);

        volume.set_muted(was_muted);
        match &result {
            Ok(()) => tracing::info!(
                uri = self.uri.as_deref().unwrap_or_default(),
                duration_ms = self.duration.unwrap_or_default(),
                "opened"
            ),
            Err(e) => tracing::warn!(locator, error = %e, "open failed"),
        }
        result
    }

    fn open_muted(&mut self, locator: &str) -> Result<(), OpenError> {
        let (path, uri) = resolve_locator(locator)?;

        self.close();
        self.state = EngineState::Opening;
        self.pipeline.set_location(&path);
        self.pipeline.set_state(PipelineState::Playing);

        if let Err(e) = self.discover_duration() {
            self.pipeline.set_state(PipelineState::Null);
            self.clear_source();
            return Err(e);
        }

        let duration = self.pipeline.query_duration().unwrap_or_default();
        self.uri = Some(uri);
        self.duration = Some(duration);
        self.pipeline.set_state(PipelineState::Paused);
        self.state = EngineState::Paused;

        let resume = self.positions.load(&path).min(duration);
        self.path = Some(path);
        self.pipeline.seek(resume, self.speed);
        Ok(())
    }

    /// Drain the bus until the opening session is playing with a known duration.
    fn discover_duration(&self) -> Result<(), OpenError> {
        let timeout = self.config.open_timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        let confirmed = || {
            self.pipeline.query_duration().is_some_and(|d| d > 0)
                && self.pipeline.current_state() == PipelineState::Playing
        };

        loop {
            match self.pipeline.wait_message(deadline) {
                Wait::Message(BusMessage::DurationChanged | BusMessage::AsyncDone) => {
                    if confirmed() {
                        return Ok(());
                    }
                }
                Wait::Message(BusMessage::Eos) => {
                    if confirmed() {
                        return Ok(());
                    }
                    return Err(OpenError::Pipeline(
                        "end of stream before a duration was known".to_string(),
                    ));
                }
                Wait::Message(BusMessage::Error { stage, message }) => {
                    return Err(OpenError::Pipeline(format!("{}: {message}", stage.name())));
                }
                Wait::TimedOut => {
                    return Err(OpenError::Timeout(timeout.unwrap_or_default()));
                }
                Wait::Disconnected => {
                    return Err(OpenError::Pipeline("pipeline bus closed".to_string()));
                }
            }
        }
    }
}

/// Resolve a locator to an existing local file and its canonical `file://` URI.
pub(crate) fn resolve_locator(locator: &str) -> Result<(PathBuf, String), OpenError> {
    let not_found = || OpenError::ResourceNotFound(locator.to_string());

    let path = if let Some(rest) = locator.strip_prefix("file://") {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        let decoded = urlencoding::decode(rest).map_err(|_| not_found())?;
        PathBuf::from(decoded.into_owned())
    } else if locator.contains("://") {
        return Err(not_found());
    } else {
        PathBuf::from(locator)
    };

    if !path.is_file() {
        return Err(not_found());
    }
    let path = path.canonicalize().unwrap_or(path);
    let uri = path_to_uri(&path);
    Ok((path, uri))
}

fn path_to_uri(path: &std::path::Path) -> String {
    let text = path.to_string_lossy();
    let encoded: Vec<String> = text
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("file://{}", encoded.join("/"))
}
