//! Core functionality for forkpool
//!
//! This crate contains the process supervisor, the worker capability, and
//! the configuration handling shared with the `forkpoold` daemon.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod supervisor;
#[cfg(unix)]
pub mod worker;


// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};
#[cfg(unix)]
pub use supervisor::{Supervisor, SupervisorConfig, Termination};
#[cfg(unix)]
pub use worker::{ExecWorker, ProcessWorker, Worker};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level` when it is set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }

    /// Check that the host offers process forking and signal delivery
    pub fn ensure_supported_platform() -> crate::Result<()> {
        if cfg!(unix) {
            Ok(())
        } else {
            Err(crate::CoreError::UnsupportedEnvironment(format!(
                "process forking and signals are not available on {}",
                std::env::consts::OS
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_platform() {
        assert!(utils::ensure_supported_platform().is_ok());
    }

    #[test]
    fn test_init_tracing_twice_fails() {
        let _ = utils::init_tracing("debug");
        let err = utils::init_tracing("debug").unwrap_err();
        assert_eq!(err.code(), "CORE003");
    }
}
