//! Liveness link between this process and the process it depends on.
//!
//! A [`LivenessLink`] runs a monitor thread that periodically probes a target
//! pid with signal 0. When the target is gone the link runs its death action,
//! which by default terminates the current process. The link can be retargeted
//! at runtime with [`LivenessLink::relink`] without restarting anything.
//!
//! Probing and retargeting share one lock: once `relink` returns, no tick can
//! fire against the previous target, and the first tick against the new target
//! happens a full interval later.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shortest check interval; shorter requests are raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of probing a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// Probe whether `pid` is alive without affecting it.
///
/// Sends the null signal. Success or `EPERM` (the process exists but belongs
/// to someone else) mean alive; anything else means dead. Zero and negative
/// pids address process groups and are reported dead.
pub fn probe(pid: Pid) -> Liveness {
    if pid.as_raw() <= 0 {
        return Liveness::Dead;
    }
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
        Err(_) => Liveness::Dead,
    }
}

/// Strategy used by the monitor thread to check its target.
pub trait Probe: Send + 'static {
    fn is_alive(&self, pid: Pid) -> bool;
}

/// The real probe, backed by [`probe`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

impl Probe for SignalProbe {
    fn is_alive(&self, pid: Pid) -> bool {
        probe(pid) == Liveness::Alive
    }
}

type DeathAction = Box<dyn FnOnce(Pid) + Send + 'static>;

/// Target currently being monitored.
#[derive(Debug)]
struct LinkState {
    target: Pid,
    interval: Duration,
    /// Bumped on every relink so a pending wait restarts its timer.
    generation: u64,
    stopped: bool,
}

struct Shared {
    state: Mutex<LinkState>,
    wake: Condvar,
}

/// An active binding between this process and the pid it must not outlive.
pub struct LivenessLink {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl LivenessLink {
    /// Link to `target`, exiting the process when it dies.
    pub fn link(target: Pid, interval: Duration) -> Self {
        Self::with_probe(target, interval, SignalProbe, exit_process)
    }

    /// Link with a custom probe and death action.
    pub fn with_probe<P, F>(target: Pid, interval: Duration, probe: P, on_dead: F) -> Self
    where
        P: Probe,
        F: FnOnce(Pid) + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                target,
                interval,
                generation: 0,
                stopped: false,
            }),
            wake: Condvar::new(),
        });

        let shared_clone = shared.clone();
        let on_dead: DeathAction = Box::new(on_dead);
        let thread = thread::Builder::new()
            .name("liveness-link".to_string())
            .spawn(move || monitor_loop(shared_clone, probe, on_dead))
            .expect("Failed to spawn liveness thread");

        tracing::debug!(
            target_pid = target.as_raw(),
            interval_ms = interval.as_millis() as u64,
            "Liveness link established"
        );

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Replace the target and interval, restarting the timer.
    pub fn relink(&self, target: Pid, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut state = self.shared.state.lock().expect("liveness state poisoned");
        let previous = state.target;
        state.target = target;
        state.interval = interval;
        state.generation += 1;
        drop(state);
        self.shared.wake.notify_all();

        tracing::debug!(
            previous_pid = previous.as_raw(),
            target_pid = target.as_raw(),
            interval_ms = interval.as_millis() as u64,
            "Liveness link retargeted"
        );
    }

    /// The pid currently being monitored.
    pub fn target(&self) -> Pid {
        self.shared.state.lock().expect("liveness state poisoned").target
    }

    /// The current check interval.
    pub fn interval(&self) -> Duration {
        self.shared
            .state
            .lock()
            .expect("liveness state poisoned")
            .interval
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.stopped = true;
        }
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LivenessLink {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LivenessLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessLink")
            .field("target", &self.target())
            .field("interval", &self.interval())
            .finish()
    }
}

/// Default death action.
fn exit_process(pid: Pid) {
    tracing::warn!(
        target_pid = pid.as_raw(),
        "Linked process is gone, shutting down"
    );
    std::process::exit(0);
}

/// Main monitor loop.
fn monitor_loop<P: Probe>(shared: Arc<Shared>, probe: P, on_dead: DeathAction) {
    let mut state = shared.state.lock().expect("liveness state poisoned");

    loop {
        if state.stopped {
            return;
        }

        let generation = state.generation;
        let deadline = Instant::now() + state.interval;

        // Sleep one interval unless relinked or stopped in the meantime
        while !state.stopped && state.generation == generation {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = shared
                .wake
                .wait_timeout(state, deadline - now)
                .expect("liveness state poisoned")
                .0;
        }

        if state.stopped {
            return;
        }
        if state.generation != generation {
            continue;
        }

        // Probe while holding the lock so relink cannot interleave
        let target = state.target;
        if !probe.is_alive(target) {
            state.stopped = true;
            drop(state);
            on_dead(target);
            return;
        }
    }
}
