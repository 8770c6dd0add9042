//! The supervisor control loop

use super::{
    NoopHooks, PoolSnapshot, ProcessControl, SupervisorConfig, SupervisorHooks, SupervisorState,
    Termination, UnixProcessControl, WorkSource, HANDLED_SIGNALS,
};
use crate::process::unix::Fork;
use crate::worker::Worker;
use crate::{CoreError, Result};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exit code of a child whose image replacement failed
const EXEC_FAILED_EXIT_CODE: i32 = 127;

/// Outcome of one spawn attempt
enum Spawned {
    /// Parent side: the child was added to the live set
    Parent,
    /// Child side: the worker returned control
    Child,
    /// The source had no worker to hand out
    Nothing,
}

/// Daemonizing supervisor of a bounded pool of forked workers
///
/// Only one live supervisor per process is supported: signal handlers are
/// process-global and forward into whichever supervisor is running its loop.
///
/// ## Example
///
/// ```rust,no_run
/// use forkpool_core::supervisor::Supervisor;
/// use forkpool_core::worker::ExecWorker;
///
/// let mut supervisor = Supervisor::new()?;
/// supervisor.set_max_children(2);
/// supervisor.add_worker(ExecWorker::new("/bin/sleep", vec!["1".into()]))?;
/// supervisor.add_worker(ExecWorker::new("/bin/sleep", vec!["2".into()]))?;
/// supervisor.execute()?; // detaches, runs both, then the daemon exits
/// # Ok::<(), forkpool_core::CoreError>(())
/// ```
pub struct Supervisor {
    control: Box<dyn ProcessControl>,
    config: SupervisorConfig,
    source: WorkSource,
    live: BTreeSet<Pid>,
    pid: Option<Pid>,
    state: SupervisorState,
    hooks: Arc<dyn SupervisorHooks>,
}

impl Supervisor {
    /// Create a FIFO supervisor on the real host with the default configuration
    ///
    /// Fails with `UnsupportedEnvironment` if fork/signal facilities are missing.
    pub fn new() -> Result<Self> {
        Ok(Self::with_control(
            Box::new(UnixProcessControl::new()?),
            SupervisorConfig::default(),
            WorkSource::queue(),
        ))
    }

    /// Create a perpetual supervisor on the real host
    pub fn perpetual() -> Result<Self> {
        Ok(Self::with_control(
            Box::new(UnixProcessControl::new()?),
            SupervisorConfig::default(),
            WorkSource::perpetual(),
        ))
    }

    /// Create a supervisor with explicit process control, configuration and work source
    pub fn with_control(
        control: Box<dyn ProcessControl>,
        config: SupervisorConfig,
        source: WorkSource,
    ) -> Self {
        Self {
            control,
            config: SupervisorConfig {
                max_children: config.max_children.max(1),
                ..config
            },
            source,
            live: BTreeSet::new(),
            pid: None,
            state: SupervisorState::NotStarted,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Install extension hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn SupervisorHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Append a worker to the tail of the queue
    ///
    /// A perpetual supervisor fails with `AlreadyAssigned` once it holds a worker.
    pub fn add_worker(&mut self, worker: impl Into<Worker>) -> Result<()> {
        let worker = worker.into();
        debug!(worker = %worker.label(), "Adding worker");
        self.source.add(worker)
    }

    /// Detach from the calling process
    ///
    /// Forks; the original process exits immediately and the new process
    /// records its pid as the supervisor identity. Calling `init` again in an
    /// initialized supervisor does nothing.
    pub fn init(&mut self) -> Result<()> {
        if self.pid.is_some() {
            debug!("Supervisor already initialized");
            return Ok(());
        }

        match self.control.fork()? {
            Fork::Parent { child } => {
                info!(daemon = child.as_raw(), "Daemon started; original process exiting");
                self.control.exit(0);
            }
            Fork::Child => {
                let pid = self.control.getpid();
                self.pid = Some(pid);
                self.state = SupervisorState::Running;
                info!(pid = pid.as_raw(), "Supervisor initialized");
            }
        }
        Ok(())
    }

    /// Run the control loop until the work is exhausted or a termination signal arrives
    ///
    /// Performs [`init`](Self::init) first if it has not run. Each iteration
    /// spawns at most one worker, reaps every exited child, ends through the
    /// termination path once queue and live set are both empty, and otherwise
    /// sleeps for the poll interval. Pending signals are handled at step
    /// boundaries only.
    ///
    /// A fork or reap failure is fatal: live children are sent SIGTERM and
    /// waited for, and the error is returned without exiting the process.
    pub fn execute(&mut self) -> Result<Termination> {
        if self.state == SupervisorState::Terminating {
            return Err(CoreError::Terminated);
        }
        if self.source.is_unassigned() {
            return Err(CoreError::NoWorkAssigned(
                "a perpetual supervisor must be assigned work before it can be executed"
                    .to_string(),
            ));
        }
        if self.pid.is_none() {
            self.init()?;
            if self.pid.is_none() {
                return Ok(Termination::Detached);
            }
        }

        self.control.install_signal_handlers(&HANDLED_SIGNALS)?;
        info!(
            max_children = self.limit(),
            sleep_ms = self.config.sleep_time.as_millis() as u64,
            queued = self.source.len(),
            perpetual = self.source.is_perpetual(),
            "Supervisor control loop started"
        );

        loop {
            if let Some(termination) = self.dispatch_signals() {
                return Ok(termination);
            }

            if self.source.has_more_work() && self.live.len() < self.limit() {
                match self.spawn_worker() {
                    Ok(Spawned::Parent) | Ok(Spawned::Nothing) => {}
                    Ok(Spawned::Child) => return Ok(Termination::WorkerReturned),
                    Err(e) => return Err(self.abort(e)),
                }
            }

            if let Err(e) = self.reap_finished() {
                return Err(self.abort(e));
            }

            if self.source.is_exhausted() && self.live.is_empty() {
                info!("All workers finished");
                self.terminate(Signal::SIGTERM);
                return Ok(Termination::Completed);
            }

            if let Some(termination) = self.dispatch_signals() {
                return Ok(termination);
            }

            self.control.sleep(self.config.sleep_time);
        }
    }

    /// Dispatch a control signal
    ///
    /// SIGTERM, SIGHUP and SIGINT start termination with that signal.
    /// SIGUSR1 and SIGUSR2 go to [`SupervisorHooks::on_user_signal`].
    /// Any other signal is ignored, as is everything once termination began.
    pub fn handle_signal(&mut self, signal: Signal) -> Option<Termination> {
        if self.state == SupervisorState::Terminating {
            debug!(signal = %signal, "Ignoring signal during termination");
            return None;
        }

        match signal {
            Signal::SIGTERM | Signal::SIGHUP | Signal::SIGINT => {
                info!(signal = %signal, "Termination signal received");
                self.terminate(signal);
                Some(Termination::Signaled(signal))
            }
            Signal::SIGUSR1 | Signal::SIGUSR2 => {
                let snapshot = self.snapshot();
                self.hooks.on_user_signal(signal, &snapshot);
                None
            }
            other => {
                debug!(signal = %other, "Ignoring unrecognized signal");
                None
            }
        }
    }

    /// Supervisor pid; `None` until [`init`](Self::init)
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Set the maximum number of concurrently live children (clamped to at least 1)
    pub fn set_max_children(&mut self, max: usize) {
        self.config.max_children = max.max(1);
    }

    /// Configured maximum number of concurrently live children
    pub fn max_children(&self) -> usize {
        self.config.max_children
    }

    /// Set the poll interval in milliseconds
    pub fn set_sleep_time(&mut self, millis: u64) {
        self.config.sleep_time = Duration::from_millis(millis);
    }

    /// Poll interval
    pub fn sleep_time(&self) -> Duration {
        self.config.sleep_time
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Point-in-time view of queue and live set
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            pid: self.pid,
            queued: self.source.len(),
            live: self.live.iter().copied().collect(),
            max_children: self.limit(),
            perpetual: self.source.is_perpetual(),
        }
    }

    fn limit(&self) -> usize {
        self.source.effective_limit(self.config.max_children)
    }

    fn dispatch_signals(&mut self) -> Option<Termination> {
        for signal in self.control.take_signals() {
            if let Some(termination) = self.handle_signal(signal) {
                return Some(termination);
            }
        }
        None
    }

    /// Dequeue the next worker and fork a child for it
    fn spawn_worker(&mut self) -> Result<Spawned> {
        let Some(worker) = self.source.next_worker() else {
            return Ok(Spawned::Nothing);
        };

        match self.control.fork()? {
            Fork::Parent { child } => {
                self.live.insert(child);
                debug!(
                    pid = child.as_raw(),
                    worker = %worker.label(),
                    live = self.live.len(),
                    "Spawned worker"
                );
                self.hooks.on_spawn(child, &worker);
                Ok(Spawned::Parent)
            }
            Fork::Child => {
                self.run_child(&worker);
                Ok(Spawned::Child)
            }
        }
    }

    /// Child side of a spawn: run the worker, then end the child
    fn run_child(&mut self, worker: &Worker) {
        self.control.reset_signal_handlers(&HANDLED_SIGNALS);
        self.live.clear();
        self.state = SupervisorState::Terminating;

        let code = match worker.execute() {
            Ok(()) => 0,
            Err(CoreError::Exec(msg)) => {
                error!(worker = %worker.label(), "{}", msg);
                EXEC_FAILED_EXIT_CODE
            }
            Err(e) => {
                error!(worker = %worker.label(), "Worker failed: {}", e);
                1
            }
        };
        self.control.exit_child(code);
    }

    /// Remove every child the OS reports as exited
    fn reap_finished(&mut self) -> Result<()> {
        while let Some(pid) = self.control.try_reap()? {
            if self.live.remove(&pid) {
                debug!(pid = pid.as_raw(), live = self.live.len(), "Reaped worker");
                self.hooks.on_reap(pid);
            } else {
                warn!(pid = pid.as_raw(), "Reaped a process that was not in the live set");
            }
        }
        Ok(())
    }

    /// Signal and wait for every live child, then end the supervisor process
    fn terminate(&mut self, signal: Signal) {
        self.stop_children(signal);
        self.control.exit(0);
    }

    fn stop_children(&mut self, signal: Signal) {
        self.state = SupervisorState::Terminating;
        let snapshot = self.snapshot();
        self.hooks.on_terminate(signal, &snapshot);

        let pids: Vec<Pid> = std::mem::take(&mut self.live).into_iter().collect();
        info!(signal = %signal, children = pids.len(), "Terminating supervisor");

        for pid in &pids {
            if let Err(e) = self.control.kill(*pid, signal) {
                warn!(pid = pid.as_raw(), "Failed to signal worker: {}", e);
            }
        }
        for pid in &pids {
            if let Err(e) = self.control.wait(*pid) {
                warn!(pid = pid.as_raw(), "Failed to wait for worker: {}", e);
            }
        }
    }

    fn abort(&mut self, err: CoreError) -> CoreError {
        error!("Supervisor loop failed: {}", err);
        self.stop_children(Signal::SIGTERM);
        err
    }
}
