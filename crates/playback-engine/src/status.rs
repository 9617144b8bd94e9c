use serde::Serialize;

/// Lifecycle state of an [`Engine`](crate::Engine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No source.
    Closed,
    /// Source requested, duration not yet confirmed.
    Opening,
    Paused,
    Playing,
}

impl EngineState {
    pub fn is_ready(self) -> bool {
        matches!(self, EngineState::Paused | EngineState::Playing)
    }
}

/// Serialisable snapshot of the engine for status displays and RPC layers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub speed: f64,
    pub volume: f64,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<(u64, u64)>,
}
