//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Host lacks the fork/signal process-control facilities
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// A perpetual supervisor was given a second worker
    #[error("Worker already assigned: {0}")]
    AlreadyAssigned(String),

    /// A perpetual supervisor was executed without a worker
    #[error("No work assigned: {0}")]
    NoWorkAssigned(String),

    /// The supervisor has already entered its termination path
    #[error("Supervisor already terminated")]
    Terminated,

    /// `fork()` failed
    #[error("Fork error: {0}")]
    Fork(String),

    /// Signal delivery or handler installation failed
    #[error("Signal error: {0}")]
    Signal(String),

    /// `waitpid()` failed
    #[error("Wait error: {0}")]
    Wait(String),

    /// Process image replacement failed
    #[error("Exec error: {0}")]
    Exec(String),

    /// A monitored subprocess could not be started
    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Configuration parsed but is invalid
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Runtime initialization (logging, async runtime) failed
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::UnsupportedEnvironment(_) => "CORE010",
            CoreError::AlreadyAssigned(_) => "CORE011",
            CoreError::NoWorkAssigned(_) => "CORE012",
            CoreError::Terminated => "CORE013",
            CoreError::Fork(_) => "CORE020",
            CoreError::Signal(_) => "CORE021",
            CoreError::Wait(_) => "CORE022",
            CoreError::Exec(_) => "CORE023",
            CoreError::ProcessSpawn(_) => "CORE024",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
