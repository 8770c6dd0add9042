use super::*;
use crate::worker::{ExecWorker, ProcessSpec, ProcessWorker};
use crate::CoreError;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum HookEvent {
    Spawn(Pid, String),
    Reap(Pid),
    User(Signal, PoolSnapshot),
    Terminate(Signal, PoolSnapshot),
}

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }

    fn spawned_labels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HookEvent::Spawn(_, label) => Some(label),
                _ => None,
            })
            .collect()
    }
}

impl SupervisorHooks for RecordingHooks {
    fn on_spawn(&self, pid: Pid, worker: &crate::worker::Worker) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::Spawn(pid, worker.label()));
    }

    fn on_reap(&self, pid: Pid) {
        self.events.lock().unwrap().push(HookEvent::Reap(pid));
    }

    fn on_user_signal(&self, signal: Signal, snapshot: &PoolSnapshot) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::User(signal, snapshot.clone()));
    }

    fn on_terminate(&self, signal: Signal, snapshot: &PoolSnapshot) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::Terminate(signal, snapshot.clone()));
    }
}

/// Mock whose first fork lands in the daemonized child, as `init` expects
fn daemonized_mock() -> MockProcessControl {
    let control = MockProcessControl::new();
    control.script_fork(MockFork::Child);
    control
}

fn supervisor(control: &MockProcessControl, max_children: usize) -> Supervisor {
    Supervisor::with_control(
        Box::new(control.clone()),
        SupervisorConfig {
            max_children,
            sleep_time: Duration::from_millis(5),
        },
        WorkSource::queue(),
    )
}

fn exec(name: &str) -> ExecWorker {
    ExecWorker::new(format!("/bin/{}", name), vec![])
}

fn position(calls: &[MockCall], call: MockCall) -> usize {
    calls
        .iter()
        .position(|c| *c == call)
        .unwrap_or_else(|| panic!("{:?} not found in {:?}", call, calls))
}

#[test]
fn test_single_slot_runs_workers_sequentially() {
    let control = daemonized_mock();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 1).with_hooks(hooks.clone());
    sup.add_worker(exec("a")).unwrap();
    sup.add_worker(exec("b")).unwrap();

    let result = sup.execute().unwrap();

    assert_eq!(result, Termination::Completed);
    // daemonizing fork plus one per worker
    assert_eq!(control.fork_count(), 3);
    let forked = control.forked_pids();
    assert_eq!(forked.len(), 2);
    assert_eq!(control.reap_count(), 2);
    assert!(control.kills().is_empty());
    assert!(control.waits().is_empty());
    assert_eq!(control.exits(), vec![0]);
    assert_eq!(control.peak_outstanding(), 1);

    // B is only forked after A was reaped
    let calls = control.calls();
    assert!(
        position(&calls, MockCall::Reap(forked[0]))
            < position(&calls, MockCall::Fork(Some(forked[1])))
    );
    assert_eq!(hooks.spawned_labels(), vec!["exec:/bin/a", "exec:/bin/b"]);
    assert_eq!(sup.state(), SupervisorState::Terminating);
}

#[test]
fn test_concurrency_never_exceeds_limit() {
    let control = daemonized_mock();
    control.set_child_lifetime(Some(5));
    let mut sup = supervisor(&control, 2);
    for name in ["a", "b", "c", "d", "e", "f"] {
        sup.add_worker(exec(name)).unwrap();
    }

    assert_eq!(sup.execute().unwrap(), Termination::Completed);
    assert_eq!(control.forked_pids().len(), 6);
    assert_eq!(control.reap_count(), 6);
    assert_eq!(control.peak_outstanding(), 2);
    assert_eq!(control.outstanding(), 0);
}

#[test]
fn test_workers_spawn_in_fifo_order() {
    let control = daemonized_mock();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 2).with_hooks(hooks.clone());
    sup.add_worker(exec("a")).unwrap();
    sup.add_worker(exec("b")).unwrap();
    sup.add_worker(exec("c")).unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::Completed);
    assert_eq!(
        hooks.spawned_labels(),
        vec!["exec:/bin/a", "exec:/bin/b", "exec:/bin/c"]
    );
    assert_eq!(control.peak_outstanding(), 2);
}

#[test]
fn test_at_most_one_spawn_per_iteration() {
    let control = daemonized_mock();
    control.set_child_lifetime(None);
    control.raise_after_sleeps(2, Signal::SIGTERM);
    let mut sup = supervisor(&control, 5);
    for name in ["a", "b", "c", "d", "e"] {
        sup.add_worker(exec(name)).unwrap();
    }

    assert_eq!(
        sup.execute().unwrap(),
        Termination::Signaled(Signal::SIGTERM)
    );
    // two iterations completed before the signal was seen
    assert_eq!(control.forked_pids().len(), 2);
    assert_eq!(sup.snapshot().queued, 3);
}

#[test]
fn test_termination_signal_kills_then_waits_for_all_children() {
    let control = daemonized_mock();
    control.set_child_lifetime(None);
    control.raise_after_sleeps(3, Signal::SIGTERM);
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 3).with_hooks(hooks.clone());
    for name in ["a", "b", "c"] {
        sup.add_worker(exec(name)).unwrap();
    }

    let result = sup.execute().unwrap();

    assert_eq!(result, Termination::Signaled(Signal::SIGTERM));
    let forked = control.forked_pids();
    assert_eq!(forked.len(), 3);
    let kills = control.kills();
    assert_eq!(kills.len(), 3);
    assert!(kills.iter().all(|(_, sig)| *sig == Signal::SIGTERM));
    assert_eq!(control.waits(), forked);
    assert_eq!(control.exits(), vec![0]);
    assert_eq!(control.outstanding(), 0);

    // every kill precedes every wait
    let calls = control.calls();
    let last_kill = calls
        .iter()
        .rposition(|c| matches!(c, MockCall::Kill(..)))
        .unwrap();
    let first_wait = calls
        .iter()
        .position(|c| matches!(c, MockCall::Wait(_)))
        .unwrap();
    assert!(last_kill < first_wait);

    let terminate = hooks
        .events()
        .into_iter()
        .find_map(|e| match e {
            HookEvent::Terminate(sig, snapshot) => Some((sig, snapshot)),
            _ => None,
        })
        .unwrap();
    assert_eq!(terminate.0, Signal::SIGTERM);
    assert_eq!(terminate.1.live, forked);
}

#[test]
fn test_hangup_and_interrupt_forward_their_own_signal() {
    for signal in [Signal::SIGHUP, Signal::SIGINT] {
        let control = daemonized_mock();
        control.set_child_lifetime(None);
        control.raise_after_sleeps(1, signal);
        let mut sup = supervisor(&control, 1);
        sup.add_worker(exec("a")).unwrap();

        assert_eq!(sup.execute().unwrap(), Termination::Signaled(signal));
        let forked = control.forked_pids();
        assert_eq!(control.kills(), vec![(forked[0], signal)]);
        assert_eq!(control.waits(), forked);
    }
}

#[test]
fn test_user_signal_reaches_hook_without_stopping() {
    let control = daemonized_mock();
    control.raise_after_sleeps(1, Signal::SIGUSR1);
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 1).with_hooks(hooks.clone());
    sup.add_worker(exec("a")).unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::Completed);

    let forked = control.forked_pids();
    let user = hooks
        .events()
        .into_iter()
        .find_map(|e| match e {
            HookEvent::User(sig, snapshot) => Some((sig, snapshot)),
            _ => None,
        })
        .unwrap();
    assert_eq!(user.0, Signal::SIGUSR1);
    assert_eq!(
        user.1,
        PoolSnapshot {
            pid: sup.pid(),
            queued: 0,
            live: forked.clone(),
            max_children: 1,
            perpetual: false,
        }
    );
    assert!(control.kills().is_empty());
}

#[test]
fn test_unrecognized_signal_is_ignored() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 1);
    sup.init().unwrap();

    assert_eq!(sup.handle_signal(Signal::SIGWINCH), None);
    assert_eq!(sup.handle_signal(Signal::SIGUSR2), None);
    assert_eq!(sup.state(), SupervisorState::Running);
    assert!(control.exits().is_empty());
}

#[test]
fn test_signals_ignored_once_terminating() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 1);
    sup.add_worker(exec("a")).unwrap();
    assert_eq!(sup.execute().unwrap(), Termination::Completed);

    assert_eq!(sup.handle_signal(Signal::SIGTERM), None);
    assert_eq!(control.exits(), vec![0]);
}

#[test]
fn test_execute_after_termination_fails() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 1);
    sup.add_worker(exec("a")).unwrap();
    assert_eq!(sup.execute().unwrap(), Termination::Completed);

    let err = sup.execute().unwrap_err();
    assert!(matches!(err, CoreError::Terminated));
    assert_eq!(control.fork_count(), 2);
}

#[test]
fn test_fork_failure_cleans_up_live_children() {
    let control = daemonized_mock();
    control.set_child_lifetime(None);
    control.script_fork(MockFork::Parent);
    control.script_fork(MockFork::Fail);
    let mut sup = supervisor(&control, 2);
    sup.add_worker(exec("a")).unwrap();
    sup.add_worker(exec("b")).unwrap();

    let err = sup.execute().unwrap_err();

    assert!(matches!(err, CoreError::Fork(_)));
    let forked = control.forked_pids();
    assert_eq!(forked.len(), 1);
    assert_eq!(control.kills(), vec![(forked[0], Signal::SIGTERM)]);
    assert_eq!(control.waits(), forked);
    // the error is handed back instead of ending the process
    assert!(control.exits().is_empty());
    assert_eq!(sup.state(), SupervisorState::Terminating);
}

#[test]
fn test_daemonizing_fork_failure_is_returned() {
    let control = MockProcessControl::new();
    control.script_fork(MockFork::Fail);
    let mut sup = supervisor(&control, 1);
    sup.add_worker(exec("a")).unwrap();

    let err = sup.execute().unwrap_err();
    assert!(matches!(err, CoreError::Fork(_)));
    assert_eq!(sup.pid(), None);
    assert!(control.kills().is_empty());
}

#[test]
fn test_original_process_detaches() {
    let control = MockProcessControl::new();
    let mut sup = supervisor(&control, 1);
    sup.add_worker(exec("a")).unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::Detached);
    assert_eq!(sup.pid(), None);
    assert_eq!(control.fork_count(), 1);
    assert_eq!(control.exits(), vec![0]);
    assert!(!control.calls().contains(&MockCall::InstallHandlers));
}

#[test]
fn test_init_is_idempotent() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 1);

    assert_eq!(sup.state(), SupervisorState::NotStarted);
    sup.init().unwrap();
    let pid = sup.pid();
    assert!(pid.is_some());
    sup.init().unwrap();

    assert_eq!(sup.pid(), pid);
    assert_eq!(control.fork_count(), 1);
    assert_eq!(sup.state(), SupervisorState::Running);

    // execute does not fork the daemon again
    assert_eq!(sup.execute().unwrap(), Termination::Completed);
    assert_eq!(control.fork_count(), 1);
}

#[test]
fn test_empty_queue_completes_immediately() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 3);

    assert_eq!(sup.execute().unwrap(), Termination::Completed);
    assert_eq!(control.fork_count(), 1);
    assert_eq!(control.sleep_count(), 0);
    assert_eq!(control.exits(), vec![0]);
}

#[test]
fn test_child_exits_127_when_exec_fails() {
    let control = daemonized_mock();
    control.script_fork(MockFork::Child);
    let mut sup = supervisor(&control, 1);
    sup.add_worker(ExecWorker::new("/nonexistent/forkpool-worker", vec![]))
        .unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::WorkerReturned);
    assert_eq!(control.child_exits(), vec![127]);
    assert!(control.calls().contains(&MockCall::ResetHandlers));
    assert!(control.exits().is_empty());
    assert!(control.kills().is_empty());
}

#[test]
fn test_child_exits_cleanly_after_process_worker() {
    let control = daemonized_mock();
    control.script_fork(MockFork::Child);
    let mut sup = supervisor(&control, 1);
    sup.add_worker(ProcessWorker::new(ProcessSpec::new("true", vec![])))
        .unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::WorkerReturned);
    assert_eq!(control.child_exits(), vec![0]);
}

#[test]
fn test_child_exits_1_when_process_worker_cannot_spawn() {
    let control = daemonized_mock();
    control.script_fork(MockFork::Child);
    let mut sup = supervisor(&control, 1);
    sup.add_worker(ProcessWorker::new(ProcessSpec::new(
        "/nonexistent/forkpool-worker",
        vec![],
    )))
    .unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::WorkerReturned);
    assert_eq!(control.child_exits(), vec![1]);
}

#[test]
fn test_spawn_and_reap_hooks() {
    let control = daemonized_mock();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 1).with_hooks(hooks.clone());
    sup.add_worker(exec("a")).unwrap();

    sup.execute().unwrap();

    let pid = control.forked_pids()[0];
    let events = hooks.events();
    assert_eq!(events[0], HookEvent::Spawn(pid, "exec:/bin/a".to_string()));
    assert_eq!(events[1], HookEvent::Reap(pid));
    assert!(matches!(events[2], HookEvent::Terminate(Signal::SIGTERM, _)));
}

#[test]
fn test_foreign_exit_leaves_live_set_untouched() {
    let control = daemonized_mock();
    control.set_child_lifetime(Some(3));
    control.inject_exited(Pid::from_raw(4242));
    control.raise_after_sleeps(1, Signal::SIGUSR1);
    let hooks = Arc::new(RecordingHooks::default());
    let mut sup = supervisor(&control, 1).with_hooks(hooks.clone());
    sup.add_worker(exec("a")).unwrap();

    assert_eq!(sup.execute().unwrap(), Termination::Completed);

    let forked = control.forked_pids();
    assert_eq!(forked.len(), 1);
    assert_eq!(control.reap_count(), 2);

    let events = hooks.events();
    let reaped: Vec<Pid> = events
        .iter()
        .filter_map(|e| match e {
            HookEvent::Reap(pid) => Some(*pid),
            _ => None,
        })
        .collect();
    assert_eq!(reaped, forked);

    // still tracked after the foreign exit was observed
    let live_at_signal = events
        .iter()
        .find_map(|e| match e {
            HookEvent::User(_, snapshot) => Some(snapshot.live.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(live_at_signal, forked);

    // completion waited for the real child's own exit
    assert_eq!(control.sleep_count(), 3);
}

#[test]
fn test_settings_accessors() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 0);
    assert_eq!(sup.max_children(), 1);

    sup.set_max_children(4);
    assert_eq!(sup.max_children(), 4);
    sup.set_max_children(0);
    assert_eq!(sup.max_children(), 1);

    sup.set_sleep_time(250);
    assert_eq!(sup.sleep_time(), Duration::from_millis(250));
}

#[test]
fn test_sleep_uses_configured_interval() {
    let control = daemonized_mock();
    let mut sup = supervisor(&control, 1);
    sup.set_sleep_time(250);
    sup.add_worker(exec("a")).unwrap();

    sup.execute().unwrap();

    let sleeps: Vec<_> = control
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            MockCall::Sleep(d) => Some(d),
            _ => None,
        })
        .collect();
    assert!(!sleeps.is_empty());
    assert!(sleeps.iter().all(|d| *d == Duration::from_millis(250)));
}

#[test]
fn test_snapshot_before_init() {
    let control = MockProcessControl::new();
    let mut sup = supervisor(&control, 2);
    sup.add_worker(exec("a")).unwrap();
    sup.add_worker(exec("b")).unwrap();

    let snapshot = sup.snapshot();
    assert_eq!(snapshot.pid, None);
    assert_eq!(snapshot.queued, 2);
    assert!(snapshot.live.is_empty());
    assert_eq!(snapshot.max_children, 2);
    assert!(!snapshot.perpetual);
}
