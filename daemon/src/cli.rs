//! Command-line arguments and their merge into the file configuration

use crate::{DaemonError, Result};
use clap::Parser;
use forkpool_core::config::{parse_config_from_toml_path, validate};
use schema::{DaemonConfig, LogLevel, WorkerSpec};
use std::path::PathBuf;

/// Run a bounded pool of forked workers as a daemon
#[derive(Parser, Debug, Default)]
#[command(name = "forkpoold")]
#[command(about = "Run a bounded pool of forked workers as a daemon")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Maximum number of concurrently running workers
    #[arg(long)]
    pub max_children: Option<usize>,

    /// Poll interval of the control loop in milliseconds
    #[arg(long)]
    pub sleep_ms: Option<u64>,

    /// Re-run a single worker forever instead of draining a queue
    #[arg(long)]
    pub perpetual: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Print the JSON schema of the configuration file and exit
    #[arg(long)]
    pub print_schema: bool,

    /// Executable path and arguments, queued after the configured workers
    #[arg(last = true, value_name = "PROGRAM")]
    pub command: Vec<String>,
}

impl Cli {
    /// Load the configuration file (if any), apply overrides, and validate the result
    pub fn resolve_config(&self) -> Result<DaemonConfig> {
        let mut cfg = match &self.config {
            Some(path) => parse_config_from_toml_path(path)?,
            None => DaemonConfig::default(),
        };
        self.apply_overrides(&mut cfg);
        validate(&cfg)?;

        if cfg.workers.is_empty() {
            return Err(DaemonError::InvalidArgument(
                "no workers configured; pass --config FILE or -- PROGRAM [ARGS...]".to_string(),
            ));
        }
        Ok(cfg)
    }

    /// Apply command-line values on top of `cfg`
    pub fn apply_overrides(&self, cfg: &mut DaemonConfig) {
        if let Some(max) = self.max_children {
            cfg.max_children = max;
        }
        if let Some(ms) = self.sleep_ms {
            cfg.sleep_ms = ms;
        }
        if self.perpetual {
            cfg.perpetual = true;
        }
        if let Some(level) = self.log_level {
            cfg.log_level = level;
        }
        if let Some((program, args)) = self.command.split_first() {
            cfg.workers.push(WorkerSpec::exec(program.clone(), args.to_vec()));
        }
    }
}

fn parse_log_level(s: &str) -> std::result::Result<LogLevel, String> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!(
            "unknown log level '{}' (expected trace, debug, info, warn or error)",
            s
        )),
    }
}
