//! Termination analysis for worker processes.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Stopped by SIGTERM, the orderly shutdown path.
    Terminated,
    /// Force-killed with SIGKILL.
    Killed,
    /// Killed by another signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker shut down the way the supervisor asked it to.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0) | Self::Terminated)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Terminated => "terminated (SIGTERM)".to_string(),
            Self::Killed => "killed (SIGKILL)".to_string(),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, Signal::SIGTERM, _) => TerminationReason::Terminated,
        WaitStatus::Signaled(_, Signal::SIGKILL, _) => TerminationReason::Killed,
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
