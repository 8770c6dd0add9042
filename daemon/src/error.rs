//! Daemon error types

use forkpool_core::CoreError;
use thiserror::Error;

/// Daemon-specific error types
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Command-line arguments that cannot be turned into a runnable pool
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by the supervisor library
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failed
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DaemonError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::InvalidArgument(_) => "DAEMON001",
            DaemonError::Core(e) => e.code(),
            DaemonError::SerializationError(_) => "DAEMON002",
        }
    }
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;
