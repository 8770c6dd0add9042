//! Daemon library for forkpool
//!
//! `forkpoold` reads a TOML configuration, merges command-line overrides,
//! and hands the resulting worker queue to a [`forkpool_core::Supervisor`].

#[cfg(unix)]
pub mod bootstrap;
pub mod cli;
pub mod error;

pub use cli::Cli;
pub use error::{DaemonError, Result};

use forkpool_core::utils;
use schema::DaemonConfig;
use tracing::info;

/// Run the daemon for parsed command-line arguments
///
/// Returns in the original process once the daemon has detached. In the
/// daemon itself the supervisor ends the process when its work is done or a
/// termination signal arrives.
pub fn run(cli: &Cli) -> Result<()> {
    if cli.print_schema {
        println!("{}", config_schema_json()?);
        return Ok(());
    }

    let cfg = cli.resolve_config()?;
    utils::init_tracing(cfg.log_level.as_str())?;
    utils::ensure_supported_platform()?;
    info!("Starting forkpoold v{}", env!("CARGO_PKG_VERSION"));

    run_supervisor(&cfg)
}

/// JSON schema of the configuration file
pub fn config_schema_json() -> Result<String> {
    let schema = schemars::schema_for!(DaemonConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

#[cfg(unix)]
fn run_supervisor(cfg: &DaemonConfig) -> Result<()> {
    use forkpool_core::Termination;

    let mut supervisor = bootstrap::build_supervisor(cfg)?;
    match supervisor.execute()? {
        Termination::Detached => info!("Daemon detached"),
        other => info!(termination = ?other, "Supervisor finished"),
    }
    Ok(())
}

#[cfg(not(unix))]
fn run_supervisor(_cfg: &DaemonConfig) -> Result<()> {
    Ok(())
}
