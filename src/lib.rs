pub mod axis;
pub mod backends;
pub mod config;
pub mod easing;
pub mod engine;
pub mod error;
pub mod event;
pub mod keysym;
pub mod motion;
pub mod mux;
pub mod ramp;
pub mod sink;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::{Error, Result};
pub use event::{KeyCode, RawEvent, RawKind, SourceId};
pub use mux::{CapabilityFilter, DeviceMultiplexer, EventSource, SourceScanner};
pub use sink::VirtualSink;
