//! Process-control adapters for the supervisor
//!
//! This module provides the [`ProcessControl`] trait, which abstracts every
//! operating-system primitive the control loop touches, so the loop can be
//! driven deterministically by [`MockProcessControl`] in tests and by
//! [`UnixProcessControl`] on a real host.

use crate::process::unix::{self, Fork};
use crate::Result;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Trait for the process primitives used by the supervisor control loop
pub trait ProcessControl: Send + Sync {
    /// Fork the current process
    fn fork(&self) -> Result<Fork>;

    /// Reap one exited child without blocking; `None` when nothing has exited
    fn try_reap(&self) -> Result<Option<Pid>>;

    /// Send a signal to a process; a process that is already gone is not an error
    fn kill(&self, pid: Pid, signal: Signal) -> Result<()>;

    /// Block until the process exits; returns immediately if it already has
    fn wait(&self, pid: Pid) -> Result<()>;

    /// Identifier of the current process
    fn getpid(&self) -> Pid;

    /// Pause the control loop
    fn sleep(&self, duration: Duration);

    /// Route `signals` into the pending mask read by [`ProcessControl::take_signals`]
    fn install_signal_handlers(&self, signals: &[Signal]) -> Result<()>;

    /// Restore default dispositions for `signals`
    fn reset_signal_handlers(&self, signals: &[Signal]);

    /// Drain signals delivered since the last call
    fn take_signals(&self) -> Vec<Signal>;

    /// End the supervisor process. Does not return on a real host.
    fn exit(&self, code: i32);

    /// End a forked child without running inherited exit handlers. Does not return on a real host.
    fn exit_child(&self, code: i32);
}

/// Process control backed by the real Unix system calls
#[derive(Copy, Clone, Debug)]
pub struct UnixProcessControl {
    _private: (),
}

impl UnixProcessControl {
    /// Create a Unix process controller
    ///
    /// Fails with `UnsupportedEnvironment` when the host lacks fork/signal support.
    pub fn new() -> Result<Self> {
        crate::utils::ensure_supported_platform()?;
        Ok(Self { _private: () })
    }
}

impl ProcessControl for UnixProcessControl {
    fn fork(&self) -> Result<Fork> {
        unix::fork_process()
    }

    fn try_reap(&self) -> Result<Option<Pid>> {
        unix::reap_any()
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        unix::signal_process(pid, signal)
    }

    fn wait(&self, pid: Pid) -> Result<()> {
        unix::wait_for_exit(pid)
    }

    fn getpid(&self) -> Pid {
        nix::unistd::getpid()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn install_signal_handlers(&self, signals: &[Signal]) -> Result<()> {
        unix::install_handlers(signals)
    }

    fn reset_signal_handlers(&self, signals: &[Signal]) {
        unix::reset_handlers(signals);
    }

    fn take_signals(&self) -> Vec<Signal> {
        unix::take_pending_signals()
    }

    fn exit(&self, code: i32) {
        debug!("Supervisor process {} exiting with code {}", nix::unistd::getpid(), code);
        std::process::exit(code);
    }

    fn exit_child(&self, code: i32) {
        unix::exit_child(code);
    }
}

/// A call observed by [`MockProcessControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    /// `fork()`; `Some(pid)` in the parent, `None` in the child
    Fork(Option<Pid>),
    /// A successful non-blocking reap
    Reap(Pid),
    /// Signal delivery
    Kill(Pid, Signal),
    /// Blocking wait
    Wait(Pid),
    /// Poll-interval sleep
    Sleep(Duration),
    /// Signal handlers installed
    InstallHandlers,
    /// Signal handlers reset (child side)
    ResetHandlers,
    /// Supervisor exit
    Exit(i32),
    /// Child exit
    ExitChild(i32),
}

/// Scripted outcome for the next `fork()` of a [`MockProcessControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFork {
    /// Return to the caller as the parent of a new fake child (the default)
    Parent,
    /// Return to the caller as the child
    Child,
    /// Fail with a fork error
    Fail,
}

#[derive(Debug)]
struct MockChild {
    /// Sleep tick at which the child exits on its own
    exit_at: Option<u32>,
    /// Killed by a signal
    signalled: bool,
}

#[derive(Debug)]
struct MockState {
    self_pid: Pid,
    next_pid: i32,
    fork_script: VecDeque<MockFork>,
    child_lifetime: Option<u32>,
    children: BTreeMap<Pid, MockChild>,
    foreign_exits: VecDeque<Pid>,
    sleeps: u32,
    max_sleeps: u32,
    scheduled_signals: Vec<(u32, Signal)>,
    peak_outstanding: usize,
    calls: Vec<MockCall>,
}

/// Mock process control for testing
///
/// Hands out increasing fake pids, lets children "exit" after a configurable
/// number of poll-interval sleeps, records every call, and never ends the
/// test process. Clones share state.
#[derive(Debug, Clone)]
pub struct MockProcessControl {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessControl {
    /// Create a mock whose children exit after one sleep tick
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                self_pid: Pid::from_raw(100),
                next_pid: 1000,
                fork_script: VecDeque::new(),
                child_lifetime: Some(1),
                children: BTreeMap::new(),
                foreign_exits: VecDeque::new(),
                sleeps: 0,
                max_sleeps: 10_000,
                scheduled_signals: Vec::new(),
                peak_outstanding: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the outcome of the next unscripted `fork()`
    pub fn script_fork(&self, outcome: MockFork) {
        self.lock().fork_script.push_back(outcome);
    }

    /// Number of sleep ticks a child lives; `None` keeps children alive until signalled
    pub fn set_child_lifetime(&self, ticks: Option<u32>) {
        self.lock().child_lifetime = ticks;
    }

    /// Panic once the loop has slept this many times (guards against runaway loops)
    pub fn set_max_sleeps(&self, max: u32) {
        self.lock().max_sleeps = max;
    }

    /// Deliver `signal` once the loop has slept `sleeps` times
    pub fn raise_after_sleeps(&self, sleeps: u32, signal: Signal) {
        self.lock().scheduled_signals.push((sleeps, signal));
    }

    /// Report `pid` from the next `try_reap()` although it was never forked here
    pub fn inject_exited(&self, pid: Pid) {
        self.lock().foreign_exits.push_back(pid);
    }

    /// All calls, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Pids handed to the parent side of `fork()`, in spawn order
    pub fn forked_pids(&self) -> Vec<Pid> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Fork(Some(pid)) => Some(*pid),
                _ => None,
            })
            .collect()
    }

    /// Number of `fork()` calls, including child-side returns and failures
    pub fn fork_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Fork(_)))
    }

    /// Number of successful non-blocking reaps
    pub fn reap_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Reap(_)))
    }

    /// Signals delivered to children
    pub fn kills(&self) -> Vec<(Pid, Signal)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Kill(pid, sig) => Some((*pid, *sig)),
                _ => None,
            })
            .collect()
    }

    /// Pids passed to blocking waits
    pub fn waits(&self) -> Vec<Pid> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Wait(pid) => Some(*pid),
                _ => None,
            })
            .collect()
    }

    /// Number of poll-interval sleeps
    pub fn sleep_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Sleep(_)))
    }

    /// Exit codes passed to `exit()`
    pub fn exits(&self) -> Vec<i32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Exit(code) => Some(*code),
                _ => None,
            })
            .collect()
    }

    /// Exit codes passed to `exit_child()`
    pub fn child_exits(&self) -> Vec<i32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::ExitChild(code) => Some(*code),
                _ => None,
            })
            .collect()
    }

    /// Highest number of forked-but-unreaped children seen at any time
    pub fn peak_outstanding(&self) -> usize {
        self.lock().peak_outstanding
    }

    /// Children forked and not yet reaped or waited for
    pub fn outstanding(&self) -> usize {
        self.lock().children.len()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

impl ProcessControl for MockProcessControl {
    fn fork(&self) -> Result<Fork> {
        let mut st = self.lock();
        let outcome = st.fork_script.pop_front().unwrap_or(MockFork::Parent);
        match outcome {
            MockFork::Fail => {
                st.calls.push(MockCall::Fork(None));
                Err(crate::CoreError::Fork("mock fork failure".to_string()))
            }
            MockFork::Child => {
                st.next_pid += 1;
                st.self_pid = Pid::from_raw(st.next_pid);
                st.calls.push(MockCall::Fork(None));
                Ok(Fork::Child)
            }
            MockFork::Parent => {
                st.next_pid += 1;
                let child = Pid::from_raw(st.next_pid);
                let sleeps = st.sleeps;
                let exit_at = st.child_lifetime.map(|ticks| sleeps + ticks);
                st.children.insert(
                    child,
                    MockChild {
                        exit_at,
                        signalled: false,
                    },
                );
                st.peak_outstanding = st.peak_outstanding.max(st.children.len());
                st.calls.push(MockCall::Fork(Some(child)));
                Ok(Fork::Parent { child })
            }
        }
    }

    fn try_reap(&self) -> Result<Option<Pid>> {
        let mut st = self.lock();
        if let Some(pid) = st.foreign_exits.pop_front() {
            st.calls.push(MockCall::Reap(pid));
            return Ok(Some(pid));
        }
        let sleeps = st.sleeps;
        let exited = st
            .children
            .iter()
            .find(|(_, c)| c.signalled || c.exit_at.is_some_and(|at| sleeps >= at))
            .map(|(pid, _)| *pid);
        if let Some(pid) = exited {
            st.children.remove(&pid);
            st.calls.push(MockCall::Reap(pid));
        }
        Ok(exited)
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        let mut st = self.lock();
        if let Some(child) = st.children.get_mut(&pid) {
            child.signalled = true;
        }
        st.calls.push(MockCall::Kill(pid, signal));
        Ok(())
    }

    fn wait(&self, pid: Pid) -> Result<()> {
        let mut st = self.lock();
        st.children.remove(&pid);
        st.calls.push(MockCall::Wait(pid));
        Ok(())
    }

    fn getpid(&self) -> Pid {
        self.lock().self_pid
    }

    fn sleep(&self, duration: Duration) {
        let mut st = self.lock();
        st.sleeps += 1;
        st.calls.push(MockCall::Sleep(duration));
        let (sleeps, max) = (st.sleeps, st.max_sleeps);
        drop(st);
        assert!(sleeps <= max, "mock control loop exceeded {} sleeps", max);
    }

    fn install_signal_handlers(&self, _signals: &[Signal]) -> Result<()> {
        self.lock().calls.push(MockCall::InstallHandlers);
        Ok(())
    }

    fn reset_signal_handlers(&self, _signals: &[Signal]) {
        self.lock().calls.push(MockCall::ResetHandlers);
    }

    fn take_signals(&self) -> Vec<Signal> {
        let mut st = self.lock();
        let sleeps = st.sleeps;
        let (due, pending): (Vec<_>, Vec<_>) = st
            .scheduled_signals
            .drain(..)
            .partition(|(at, _)| sleeps >= *at);
        st.scheduled_signals = pending;
        due.into_iter().map(|(_, sig)| sig).collect()
    }

    fn exit(&self, code: i32) {
        self.lock().calls.push(MockCall::Exit(code));
    }

    fn exit_child(&self, code: i32) {
        self.lock().calls.push(MockCall::ExitChild(code));
    }
}
