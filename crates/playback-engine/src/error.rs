use std::time::Duration;

use thiserror::Error;

use crate::bus::Stage;

/// The pipeline could not be assembled; no engine is produced.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("missing pipeline stage {}: {reason}", stage.name())]
    MissingStage { stage: Stage, reason: String },
}

/// Opening a source failed. The engine is closed again when this is returned.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("no duration after {0:?}")]
    Timeout(Duration),
}
