//! Daemon bootstrap: turn a resolved configuration into a ready supervisor
//!
//! Process workers get a callback that forwards their output lines and exit
//! status into the daemon's log; exec workers write straight to the inherited
//! descriptors. SIGUSR1/SIGUSR2 are answered by [`StatusReporter`].

use crate::Result;
use forkpool_core::supervisor::{
    ProcessControl, StatusReporter, Supervisor, SupervisorConfig, UnixProcessControl, WorkSource,
};
use forkpool_core::worker::{ProcessEvent, Worker};
use schema::{DaemonConfig, WorkerSpec};
use std::sync::Arc;
use tracing::{info, warn};

/// Build a supervisor on the real host
pub fn build_supervisor(cfg: &DaemonConfig) -> Result<Supervisor> {
    let control = UnixProcessControl::new()?;
    build_supervisor_with_control(cfg, Box::new(control))
}

/// Build a supervisor over an explicit process-control implementation
pub fn build_supervisor_with_control(
    cfg: &DaemonConfig,
    control: Box<dyn ProcessControl>,
) -> Result<Supervisor> {
    let source = if cfg.perpetual {
        WorkSource::perpetual()
    } else {
        WorkSource::queue()
    };

    let mut supervisor = Supervisor::with_control(control, SupervisorConfig::from(cfg), source)
        .with_hooks(Arc::new(StatusReporter));
    for spec in &cfg.workers {
        supervisor.add_worker(worker_from_spec(spec))?;
    }

    info!(
        workers = cfg.workers.len(),
        max_children = cfg.max_children,
        sleep_ms = cfg.sleep_ms,
        perpetual = cfg.perpetual,
        "Supervisor configured"
    );
    Ok(supervisor)
}

/// Build the worker for one configured entry
pub fn worker_from_spec(spec: &WorkerSpec) -> Worker {
    match Worker::from(spec) {
        Worker::Process(worker) => {
            let program = spec.program.clone();
            Worker::Process(worker.with_callback(move |event| log_process_event(&program, event)))
        }
        exec => exec,
    }
}

fn log_process_event(program: &str, event: &ProcessEvent) {
    match event {
        ProcessEvent::Output { stream, line } => {
            info!(program, stream = ?stream, "{}", line);
        }
        ProcessEvent::Exited {
            code: Some(0), ..
        } => {
            info!(program, "Worker process finished");
        }
        ProcessEvent::Exited { code, signal } => {
            warn!(program, code = ?code, signal = ?signal, "Worker process failed");
        }
    }
}
