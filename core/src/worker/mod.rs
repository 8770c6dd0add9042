//! Worker capability: one unit of work executed inside a forked child
//!
//! A [`Worker`] is a small closed set of launch mechanisms behind a single
//! [`Worker::execute`] operation. The supervisor forks, and the child calls
//! `execute()` exactly once. What happens next depends on the variant:
//!
//! | Variant              | `execute()` returns?                 | Child exit code                 |
//! |----------------------|--------------------------------------|---------------------------------|
//! | [`ExecWorker`]       | Never on success (image is replaced) | Whatever the new program exits with |
//! | [`ProcessWorker`]    | Yes, after the subprocess finishes   | The supervisor exits the child normally |
//!
//! Workers hold no mutable state shared with the supervisor: each child runs
//! its own copy of the worker in its own address space.

mod exec;
mod process;

pub use exec::ExecWorker;
pub use process::{OutputStream, ProcessCallback, ProcessEvent, ProcessSpec, ProcessWorker};

use crate::Result;
use schema::{WorkerKind, WorkerSpec};

/// A schedulable unit of work
#[derive(Debug, Clone)]
pub enum Worker {
    /// Replaces the child process image (see [`ExecWorker::execute`])
    Exec(ExecWorker),
    /// Runs a subprocess to completion, then returns (see [`ProcessWorker::execute`])
    Process(ProcessWorker),
}

impl Worker {
    /// Execute the unit of work inside the current (child) process
    ///
    /// - For [`Worker::Exec`] this only returns on failure to replace the image.
    ///   On success the child becomes the target program and control never
    ///   comes back to supervisor code.
    /// - For [`Worker::Process`] this returns once the subprocess exits. The
    ///   subprocess outcome is reported to the worker's callback, not here;
    ///   `Ok(())` means the subprocess ran, regardless of its exit status.
    pub fn execute(&self) -> Result<()> {
        match self {
            Worker::Exec(worker) => Err(worker.execute()),
            Worker::Process(worker) => worker.execute().map(|_| ()),
        }
    }

    /// Short human-readable description for logs
    pub fn label(&self) -> String {
        match self {
            Worker::Exec(worker) => format!("exec:{}", worker.path()),
            Worker::Process(worker) => format!("process:{}", worker.spec().program),
        }
    }
}

impl From<ExecWorker> for Worker {
    fn from(worker: ExecWorker) -> Self {
        Worker::Exec(worker)
    }
}

impl From<ProcessWorker> for Worker {
    fn from(worker: ProcessWorker) -> Self {
        Worker::Process(worker)
    }
}

impl From<&WorkerSpec> for Worker {
    fn from(spec: &WorkerSpec) -> Self {
        match spec.kind {
            WorkerKind::Exec => ExecWorker::new(spec.program.clone(), spec.args.clone()).into(),
            WorkerKind::Process => ProcessWorker::new(ProcessSpec {
                program: spec.program.clone(),
                args: spec.args.clone(),
                environment: spec.environment.clone(),
                working_directory: spec.working_directory.clone().map(Into::into),
            })
            .into(),
        }
    }
}
