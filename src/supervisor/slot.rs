//! Handle for a spawned render worker.

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use super::signals::{TerminationReason, analyze_wait_status};
use crate::endpoint::Endpoint;
use crate::error::{Result, SsrError};

/// One worker of the pool.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    pid: Pid,
    endpoint: Endpoint,
    /// Set once the process has been reaped
    exit: Option<TerminationReason>,
}

impl WorkerSlot {
    pub fn new(index: usize, pid: Pid, endpoint: Endpoint) -> Self {
        Self {
            index,
            pid,
            endpoint,
            exit: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Why the worker exited, once it has been reaped.
    pub fn exit_reason(&self) -> Option<&TerminationReason> {
        self.exit.as_ref()
    }

    pub fn is_reaped(&self) -> bool {
        self.exit.is_some()
    }

    /// Reap the worker if it has exited (non-blocking).
    ///
    /// Returns the termination reason the first time the exit is observed.
    pub fn try_reap(&mut self) -> Result<Option<TerminationReason>> {
        if self.exit.is_some() {
            return Ok(None);
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                let reason = analyze_wait_status(status);
                self.exit = Some(reason.clone());
                Ok(Some(reason))
            }
            Err(e) => {
                self.exit = Some(TerminationReason::Unknown);
                Err(SsrError::Supervisor(format!(
                    "waitpid for worker {} failed: {}",
                    self.index, e
                )))
            }
        }
    }

    /// Send SIGTERM to the worker.
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL to the worker and reap it.
    pub fn kill(&mut self) -> Result<TerminationReason> {
        if let Some(ref reason) = self.exit {
            return Ok(reason.clone());
        }
        self.signal(Signal::SIGKILL)?;
        let status = waitpid(self.pid, None).map_err(|e| {
            SsrError::Supervisor(format!("waitpid for worker {} failed: {}", self.index, e))
        })?;
        let reason = analyze_wait_status(status);
        self.exit = Some(reason.clone());
        Ok(reason)
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, sig).map_err(|e| {
            SsrError::Supervisor(format!(
                "Failed to send {:?} to worker {}: {}",
                sig, self.index, e
            ))
        })
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if self.exit.is_none() {
            // Ask it to stop; the worker's own liveness link covers the rest
            let _ = self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command;
    use std::time::{Duration, Instant};

    fn spawn_sleep() -> WorkerSlot {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        WorkerSlot::new(
            0,
            Pid::from_raw(child.id() as i32),
            Endpoint::Unix(PathBuf::from("/tmp/renderer-0.sock")),
        )
    }

    fn reap_within(slot: &mut WorkerSlot, timeout: Duration) -> Option<TerminationReason> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(reason) = slot.try_reap().unwrap() {
                return Some(reason);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_running_worker_is_not_reaped() {
        let mut slot = spawn_sleep();
        assert_eq!(slot.try_reap().unwrap(), None);
        assert!(!slot.is_reaped());
        slot.kill().unwrap();
    }

    #[test]
    fn test_terminate_then_reap() {
        let mut slot = spawn_sleep();
        slot.terminate().unwrap();

        let reason = reap_within(&mut slot, Duration::from_secs(2)).unwrap();
        assert_eq!(reason, TerminationReason::Terminated);
        assert_eq!(slot.exit_reason(), Some(&TerminationReason::Terminated));
        // Reported only once
        assert_eq!(slot.try_reap().unwrap(), None);
        // Signalling a reaped worker is a no-op
        assert!(slot.terminate().is_ok());
    }

    #[test]
    fn test_kill_reaps() {
        let mut slot = spawn_sleep();
        assert_eq!(slot.kill().unwrap(), TerminationReason::Killed);
        assert!(slot.is_reaped());
    }

    #[test]
    fn test_exit_code_is_reported() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let mut slot = WorkerSlot::new(
            1,
            Pid::from_raw(child.id() as i32),
            Endpoint::Tcp("127.0.0.1:9001".parse().unwrap()),
        );
        let reason = reap_within(&mut slot, Duration::from_secs(2)).unwrap();
        assert_eq!(reason, TerminationReason::Exited(3));
        assert_eq!(slot.index(), 1);
    }
}
