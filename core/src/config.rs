//! Configuration loading and validation for the forkpool daemon
//!
//! This module parses a TOML configuration into a `schema::DaemonConfig`,
//! applies defaults (via serde defaults on schema types), and performs
//! strict validation with field-path error messages.

use crate::{CoreError, Result};
use schema::{DaemonConfig, WorkerKind};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Load and validate daemon configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let cfg = parse_config_from_toml_path(path)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Load and validate daemon configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<DaemonConfig> {
    let cfg = parse_config_from_toml_str(input)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Parse a TOML file without validating it
///
/// For callers that merge further settings in before calling [`validate`].
pub fn parse_config_from_toml_path(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    parse_config_from_toml_str(&data)
}

/// Parse a TOML string without validating it
pub fn parse_config_from_toml_str(input: &str) -> Result<DaemonConfig> {
    toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))
}

/// Validate a configuration and return `Result<()>` with field-path errors
pub fn validate(cfg: &DaemonConfig) -> Result<()> {
    if cfg.max_children == 0 {
        return Err(CoreError::ValidationError(
            "maxChildren: must be > 0".to_string(),
        ));
    }

    for (i, worker) in cfg.workers.iter().enumerate() {
        if worker.program.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "workers[{}].program: cannot be empty",
                i
            )));
        }

        if worker.environment.keys().any(|k| k.trim().is_empty()) {
            return Err(CoreError::ValidationError(format!(
                "workers[{}].environment: keys cannot be empty",
                i
            )));
        }

        // an exec worker replaces the child image, there is nothing to configure
        if worker.kind == WorkerKind::Exec {
            if !worker.environment.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "workers[{}].environment: only supported for process workers",
                    i
                )));
            }
            if worker.working_directory.is_some() {
                return Err(CoreError::ValidationError(format!(
                    "workers[{}].workingDirectory: only supported for process workers",
                    i
                )));
            }
        }
    }

    if cfg.perpetual && cfg.workers.len() != 1 {
        return Err(CoreError::ValidationError(format!(
            "workers: a perpetual daemon needs exactly one worker, found {}",
            cfg.workers.len()
        )));
    }

    debug!("Configuration validated successfully");
    Ok(())
}
