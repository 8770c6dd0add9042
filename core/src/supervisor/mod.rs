//! Worker-pool supervisor implementation
//!
//! This module provides the daemonizing supervisor that keeps up to
//! `max_children` forked workers running until its work is exhausted or a
//! termination signal arrives.
//!
//! ## Architecture
//!
//! A single thread runs a cooperative poll loop. Parallelism exists only
//! across the forked child processes:
//!
//! ```text
//! queue ──► spawn (fork) ──► live set ──► reap (waitpid WNOHANG) ──► removed
//!                                 ▲
//!   SIGTERM/SIGHUP/SIGINT ────────┴──► terminate: kill all, wait all, exit
//!   SIGUSR1/SIGUSR2 ─────────────────► SupervisorHooks::on_user_signal
//! ```
//!
//! State transitions:
//!
//! ```text
//! NotStarted → (init) → Running → (exhausted | signal) → Terminating
//! ```
//!
//! `Terminating` is absorbing: no loop iteration runs after it begins.
//!
//! ## Components
//!
//! - [`Supervisor`]: the control loop and its state
//! - [`WorkSource`]: FIFO queue or perpetual single worker
//! - [`ProcessControl`]: OS primitives, with [`UnixProcessControl`] and [`MockProcessControl`]
//! - [`SupervisorHooks`]: spawn/reap/user-signal/terminate extension point

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::time::Duration;

pub mod adapters;
pub mod hooks;
pub mod pool;
pub mod work_source;

#[cfg(test)]
mod supervisor_tests;


pub use adapters::*;
pub use hooks::*;
pub use pool::Supervisor;
pub use work_source::WorkSource;

/// Signals the supervisor installs handlers for
pub const HANDLED_SIGNALS: [Signal; 5] = [
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Default poll interval of the control loop
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_millis(1000);

/// Tunables of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Maximum number of live children (at least 1)
    pub max_children: usize,
    /// Sleep between loop iterations
    pub sleep_time: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_children: 1,
            sleep_time: DEFAULT_SLEEP_TIME,
        }
    }
}

impl From<&schema::DaemonConfig> for SupervisorConfig {
    fn from(cfg: &schema::DaemonConfig) -> Self {
        Self {
            max_children: cfg.max_children.max(1),
            sleep_time: Duration::from_millis(cfg.sleep_ms),
        }
    }
}

/// Point-in-time view of a supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Supervisor pid, once initialized
    pub pid: Option<Pid>,
    /// Workers waiting to be spawned (1 for an assigned perpetual worker)
    pub queued: usize,
    /// Live children, ascending pid order
    pub live: Vec<Pid>,
    /// Effective concurrency limit
    pub max_children: usize,
    /// Whether this is the perpetual variant
    pub perpetual: bool,
}

/// Why [`Supervisor::execute`] returned
///
/// On a real host the supervisor process has already ended before any of
/// these could be returned, except where noted; they are observable with a
/// non-exiting [`ProcessControl`] such as [`MockProcessControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// This is the original process that forked the daemon; its role has ended
    Detached,
    /// Queue and live set were both empty
    Completed,
    /// A termination signal was handled
    Signaled(Signal),
    /// This is a forked child whose worker returned control
    WorkerReturned,
}

/// Lifecycle state of a supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// `init()` has not run in this process
    NotStarted,
    /// Daemonized, control loop may run
    Running,
    /// Termination has begun; absorbing
    Terminating,
}
