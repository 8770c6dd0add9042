//! Unix process primitives: fork, reap, signal, wait and exec
//!
//! These functions are thin, logged wrappers around the `nix` bindings with
//! the error tolerance the supervisor needs:
//!
//! - `ESRCH` when signalling means the process is already gone and is not an error
//! - `ECHILD` when waiting means there is nothing left to wait for and is not an error
//! - `EINTR` is retried for blocking waits
//!
//! ## Signal handlers
//!
//! Unix signal handlers cannot reach instance data, so the installed handler
//! only records the signal number in a process-global bitmask. The supervisor
//! drains that mask with [`take_pending_signals`] between loop steps and
//! dispatches into its own instance method. Only one supervisor per process
//! is assumed.

// Allow unsafe code for this module since fork, sigaction and _exit are unsafe in nix/libc
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::convert::Infallible;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Outcome of a successful fork, seen from the calling process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    /// We are the original process; `child` is the new process
    Parent {
        /// Process ID of the new child
        child: Pid,
    },
    /// We are the new child process
    Child,
}

/// Pending signal numbers, one bit per signal
static PENDING_SIGNALS: AtomicU64 = AtomicU64::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    if (1..64).contains(&signo) {
        PENDING_SIGNALS.fetch_or(1u64 << signo, Ordering::SeqCst);
    }
}

/// Fork the current process
///
/// ## Safety
///
/// `fork()` in a multi-threaded process only duplicates the calling thread.
/// The supervisor runs a single-threaded control loop; callers that start
/// other threads before forking must make sure the child only performs
/// async-signal-safe work until it execs or exits.
pub fn fork_process() -> Result<Fork> {
    // Safety: see function documentation
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("Forked child process {}", child);
            Ok(Fork::Parent { child })
        }
        Ok(ForkResult::Child) => Ok(Fork::Child),
        Err(e) => {
            error!("fork() failed: {}", e);
            Err(CoreError::Fork(format!("fork() failed: {}", e)))
        }
    }
}

/// Reap one exited child without blocking
///
/// Returns `Ok(None)` when no child has exited yet, and also when the process
/// has no children at all (`ECHILD`).
pub fn reap_any() -> Result<Option<Pid>> {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return Ok(None),
            Ok(status) => {
                debug!("Reaped child: {:?}", status);
                return Ok(status.pid());
            }
            Err(Errno::ECHILD) => return Ok(None),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("waitpid(-1, WNOHANG) failed: {}", e);
                return Err(CoreError::Wait(format!("waitpid(-1, WNOHANG) failed: {}", e)));
            }
        }
    }
}

/// Send `sig` to a single process
///
/// ## Error Handling
///
/// - `ESRCH` (No such process) is treated as success since the process already exited
/// - `EPERM` is treated as success; the pid was recycled or changed ownership
/// - Other errors are propagated as `Signal` errors
pub fn signal_process(pid: Pid, sig: Signal) -> Result<()> {
    debug!("Sending {} to process {}", sig, pid);

    match signal::kill(pid, sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Process {} already exited", pid);
            Ok(())
        }
        Err(Errno::EPERM) => {
            debug!(
                "Permission denied signaling process {} (likely already exited)",
                pid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process {}: {}", sig, pid, e);
            Err(CoreError::Signal(format!(
                "Failed to send {} to process {}: {}",
                sig, pid, e
            )))
        }
    }
}

/// Block until `pid` exits
///
/// A child that already exited (zombie) returns immediately. A pid that was
/// already reaped (`ECHILD`) is treated as success.
pub fn wait_for_exit(pid: Pid) -> Result<()> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                debug!("Process {} finished: {:?}", pid, status);
                return Ok(());
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                debug!("Process {} was already reaped", pid);
                return Ok(());
            }
            Err(e) => {
                return Err(CoreError::Wait(format!(
                    "waitpid({}) failed: {}",
                    pid, e
                )))
            }
        }
    }
}

/// Replace the current process image with `path`
///
/// `path` becomes `argv[0]`, followed by `args`. On success this never
/// returns; the returned error describes why the image could not be replaced.
pub fn exec_image(path: &str, args: &[String]) -> CoreError {
    let program = match CString::new(path) {
        Ok(p) => p,
        Err(_) => return CoreError::Exec(format!("program path contains a NUL byte: {:?}", path)),
    };

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program.clone());
    for arg in args {
        match CString::new(arg.as_str()) {
            Ok(a) => argv.push(a),
            Err(_) => {
                return CoreError::Exec(format!("argument contains a NUL byte: {:?}", arg))
            }
        }
    }

    let result: std::result::Result<Infallible, Errno> = unistd::execv(&program, &argv);
    match result {
        Ok(never) => match never {},
        Err(e) => {
            error!("execv({}) failed: {}", path, e);
            CoreError::Exec(format!("Failed to exec '{}': {}", path, e))
        }
    }
}

/// Install the recording handler for each signal in `signals`
///
/// Handlers are installed with `SA_RESTART` so that sleeps and waits in the
/// control loop resume after delivery; the loop observes the signal at its
/// next step boundary.
pub fn install_handlers(signals: &[Signal]) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in signals {
        // Safety: record_signal only performs an atomic fetch_or, which is async-signal-safe
        unsafe { signal::sigaction(*sig, &action) }.map_err(|e| {
            CoreError::Signal(format!("Failed to install handler for {}: {}", sig, e))
        })?;
        debug!("Installed handler for {}", sig);
    }
    Ok(())
}

/// Restore the default disposition for each signal in `signals`
///
/// Called in forked children so a worker that does not exec still dies on
/// SIGTERM instead of recording it into a mask nobody reads.
pub fn reset_handlers(signals: &[Signal]) {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in signals {
        // Safety: installing SIG_DFL has no handler code to run
        if let Err(e) = unsafe { signal::sigaction(*sig, &action) } {
            warn!("Failed to reset handler for {}: {}", sig, e);
        }
    }
    PENDING_SIGNALS.store(0, Ordering::SeqCst);
}

/// Drain the pending signal mask, lowest signal number first
pub fn take_pending_signals() -> Vec<Signal> {
    let mask = PENDING_SIGNALS.swap(0, Ordering::SeqCst);
    (1..64)
        .filter(|signo| mask & (1u64 << signo) != 0)
        .filter_map(|signo| Signal::try_from(signo).ok())
        .collect()
}

/// End a forked child without running the parent's exit handlers or destructors
pub fn exit_child(code: i32) -> ! {
    // Safety: _exit is async-signal-safe and never returns
    unsafe { libc::_exit(code) }
}
