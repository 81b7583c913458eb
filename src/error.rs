//! Crate error taxonomy.
//!
//! Everything here is an *expected* condition inspected by the caller; nothing
//! in the engine panics for control flow. The variants map to how the engine
//! degrades:
//! - [`Error::DeviceUnavailable`]: fatal for that device only.
//! - [`Error::DeviceDisconnected`]: the source is dropped mid-run.
//! - [`Error::ConfigurationInvalid`]: the offending unit is disabled.
//! - [`Error::Emission`]: the current frame's output is dropped.

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device path missing or permission denied at open/grab time.
    #[error("device unavailable: {path}: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A read failed mid-run; the source must be dropped by its owner.
    #[error("device disconnected: {path}")]
    DeviceDisconnected { path: String },

    /// Malformed configuration unit (axis group, schedule entry, key name).
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Writing to a virtual output device failed.
    #[error("emission failed: {0}")]
    Emission(#[source] io::Error),
}

impl Error {
    /// True when the error only degrades a single device rather than the run.
    pub fn is_device_local(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnavailable { .. } | Error::DeviceDisconnected { .. }
        )
    }
}
