//! Local media playback engine: a threaded decode → tempo → resample → output
//! pipeline behind a single-owner transport API.

mod bus;
pub mod config;
mod decode;
mod engine;
pub mod error;
pub mod events;
mod pipeline;
pub mod position;
pub mod queue;
mod resample;
mod sink;
pub mod status;
pub mod tempo;
pub mod timefmt;
pub mod volume;

#[cfg(test)]
mod testutil;

pub use bus::Stage;
pub use config::{EngineConfig, PositionBackend, SinkKind};
pub use engine::Engine;
pub use error::{ConstructionError, OpenError};
pub use events::PlayerEvent;
pub use position::{NoStore, PositionStore, TagStore, XattrStore};
pub use sink::device::output_device_names;
pub use status::{EngineState, EngineStatus};
pub use timefmt::{Delimiter, FractionSep, Precision, TimestampFormat};
