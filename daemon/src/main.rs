//! forkpoold binary
//!
//! Detaches into the background and keeps a bounded pool of worker
//! processes running until the queue drains or a termination signal arrives.

use clap::Parser;
use daemon::Cli;
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match daemon::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), "{}", e);
            eprintln!("forkpoold: [{}] {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}
