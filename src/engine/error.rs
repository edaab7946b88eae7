//! Error taxonomy for the transcode engine.
//!
//! Pre-flight problems (`InvalidRequest`, `AlreadyRunning`, `Spawn`) are returned to the
//! caller synchronously. Anything that happens after the encoder is running is reported
//! through the supervisor's state instead.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The request cannot be turned into an encoder command.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `start` was called while a job is still running on this supervisor.
    #[error("a job is already running: {label}")]
    AlreadyRunning { label: String },

    /// The encoder process could not be created.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

/// Failure of an introspection call. Never leaves the probe layer: callers get an
/// empty device list or all-false flags instead.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },
}
