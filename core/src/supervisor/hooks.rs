//! Supervisor extension points
//!
//! [`SupervisorHooks`] lets embedders observe the pool and react to the two
//! user-defined signals. Every method defaults to a no-op; hooks run on the
//! supervisor's own thread between loop steps, so they must not block.

use super::PoolSnapshot;
use crate::worker::Worker;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::info;

/// Observer and control extension point for a [`Supervisor`](super::Supervisor)
pub trait SupervisorHooks: Send + Sync {
    /// A child was forked and assigned `worker`
    fn on_spawn(&self, _pid: Pid, _worker: &Worker) {}

    /// A child was observed as exited and removed from the live set
    fn on_reap(&self, _pid: Pid) {}

    /// SIGUSR1 or SIGUSR2 was received
    fn on_user_signal(&self, _signal: Signal, _snapshot: &PoolSnapshot) {}

    /// Termination started; `snapshot` still lists the children about to be signalled
    fn on_terminate(&self, _signal: Signal, _snapshot: &PoolSnapshot) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SupervisorHooks for NoopHooks {}

/// Logs a status report whenever a user-defined signal arrives
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReporter;

impl SupervisorHooks for StatusReporter {
    fn on_user_signal(&self, signal: Signal, snapshot: &PoolSnapshot) {
        info!(
            signal = %signal,
            pid = ?snapshot.pid.map(|p| p.as_raw()),
            queued = snapshot.queued,
            live = ?snapshot.live.iter().map(|p| p.as_raw()).collect::<Vec<_>>(),
            max_children = snapshot.max_children,
            perpetual = snapshot.perpetual,
            "Supervisor status"
        );
    }
}
