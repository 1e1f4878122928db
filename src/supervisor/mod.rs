//! Supervisor of the render worker pool.
//!
//! The supervisor links itself to the host pid, spawns one worker per
//! processing unit and then listens on a private datagram socket:
//!
//! - `ready` messages are collected until every worker has warmed up, at which
//!   point the readiness sentinel is printed once for the whole pool. A
//!   timeout bounds the wait so the host never hangs on a broken worker.
//! - `handoff` messages retarget the supervisor's own liveness link.
//!
//! Dead workers are reaped and logged but never restarted. On SIGTERM or
//! SIGINT the pool is stopped (SIGTERM, grace period, SIGKILL).

pub mod protocol;
pub mod signals;
pub mod slot;
pub mod spawn;

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use tokio::net::UnixDatagram;
use tokio::signal::unix::{SignalKind, signal};

use crate::banner;
use crate::endpoint::EndpointConfig;
use crate::error::{Result, SsrError};
use crate::liveness::LivenessLink;
use crate::paths;
use crate::readiness::ReadinessSignal;
use crate::render::CachePolicy;
use protocol::SupervisorMessage;
use slot::WorkerSlot;

/// Largest side-channel datagram accepted.
const MAX_DATAGRAM: usize = 4096;

/// Poll interval while waiting for workers to exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for a supervised pool.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Number of workers to spawn.
    pub workers: usize,
    /// Host process the pool must not outlive.
    pub host_pid: Pid,
    /// Liveness check interval.
    pub ttl: Duration,
    /// Readiness sentinel.
    pub sentinel: String,
    /// Endpoint derivation for workers.
    pub endpoints: EndpointConfig,
    /// Compiled bundles directory, forwarded to workers.
    pub bundles_dir: PathBuf,
    pub cache_policy: CachePolicy,
    /// Upper bound on waiting for every worker to report ready.
    pub ready_timeout: Duration,
    /// Time workers get between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
    /// Logging flags forwarded to workers.
    pub log_args: Vec<OsString>,
}

impl SupervisorConfig {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SsrError::Supervisor("at least one worker is required".into()));
        }
        if self.endpoints.socket.is_some() && self.workers > 1 {
            return Err(SsrError::Supervisor(
                "an explicit socket path can only serve a single worker; use --socket-dir or --port"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Readiness bookkeeping and handoff relay for the pool.
#[derive(Debug)]
struct PoolState {
    pending: BTreeSet<usize>,
    ttl: Duration,
}

impl PoolState {
    fn new(workers: usize, ttl: Duration) -> Self {
        Self {
            pending: (0..workers).collect(),
            ttl,
        }
    }

    /// Apply a worker message. Returns true when the last pending worker
    /// became ready.
    fn apply(&mut self, message: SupervisorMessage, link: &LivenessLink) -> bool {
        match message {
            SupervisorMessage::Ready { index, pid } => {
                if self.pending.remove(&index) {
                    tracing::info!(index, pid, remaining = self.pending.len(), "Worker ready");
                    self.pending.is_empty()
                } else {
                    tracing::debug!(index, "Duplicate or unknown ready message");
                    false
                }
            }
            SupervisorMessage::Handoff { index, pid } => {
                if pid <= 0 {
                    tracing::warn!(index, pid, "Ignoring handoff to invalid pid");
                } else {
                    link.relink(Pid::from_raw(pid), self.ttl);
                    tracing::info!(index, host_pid = pid, "Handoff relayed");
                }
                false
            }
        }
    }

    /// A worker exited; it will never report ready. Returns true when that
    /// leaves nothing pending.
    fn worker_gone(&mut self, index: usize) -> bool {
        self.pending.remove(&index) && self.pending.is_empty()
    }
}

/// Removes the side-channel socket file when the supervisor returns.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Run the supervisor to completion on a single-threaded runtime.
pub fn run(config: SupervisorConfig) -> Result<()> {
    config.validate()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(supervise(config))
}

fn bind_side_channel(path: &Path) -> Result<UnixDatagram> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixDatagram::bind(path).map_err(|e| {
        SsrError::Supervisor(format!(
            "Failed to bind side channel {}: {}",
            path.display(),
            e
        ))
    })
}

async fn supervise(config: SupervisorConfig) -> Result<()> {
    let link = LivenessLink::link(config.host_pid, config.ttl);

    let side_path =
        paths::supervisor_socket_path(&config.endpoints.socket_dir, std::process::id());
    let side_channel = bind_side_channel(&side_path)?;
    let _socket_file = SocketFile(side_path.clone());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigchld = signal(SignalKind::child())?;

    let mut slots = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        slots.push(spawn::spawn_worker(&config, index, &side_path)?);
    }

    let mut details = vec![
        ("pid", std::process::id().to_string()),
        ("host pid", config.host_pid.to_string()),
        ("ttl", format!("{}ms", config.ttl.as_millis())),
    ];
    details.extend(
        slots
            .iter()
            .map(|slot| ("worker", format!("{} pid {} {}", slot.index(), slot.pid(), slot.endpoint()))),
    );
    banner::print(
        "supervisor",
        &format!("started {} render workers", slots.len()),
        &details,
    );

    let readiness = ReadinessSignal::new(config.sentinel.clone());
    let mut pool = PoolState::new(config.workers, config.ttl);
    let ready_deadline = tokio::time::sleep(config.ready_timeout);
    tokio::pin!(ready_deadline);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            received = side_channel.recv(&mut buf) => {
                let all_ready = match received {
                    Ok(n) => match std::str::from_utf8(&buf[..n])
                        .map_err(|e| e.to_string())
                        .and_then(|line| SupervisorMessage::from_line(line).map_err(|e| e.to_string()))
                    {
                        Ok(message) => pool.apply(message, &link),
                        Err(e) => {
                            tracing::warn!(error = %e, "Malformed side-channel message");
                            false
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Side-channel receive failed");
                        false
                    }
                };
                if all_ready && readiness.emit() {
                    tracing::info!(workers = config.workers, "All workers ready");
                }
            }
            _ = &mut ready_deadline, if !readiness.is_emitted() => {
                tracing::warn!(
                    pending = ?pool.pending,
                    timeout_secs = config.ready_timeout.as_secs(),
                    "Timed out waiting for workers, signalling readiness anyway"
                );
                readiness.emit();
            }
            _ = sigchld.recv() => {
                let mut reaped = false;
                for slot in slots.iter_mut() {
                    match slot.try_reap() {
                        Ok(Some(reason)) => {
                            reaped = true;
                            if reason.is_clean() {
                                tracing::info!(index = slot.index(), reason = %reason, "Worker exited");
                            } else {
                                tracing::warn!(
                                    index = slot.index(),
                                    pid = slot.pid().as_raw(),
                                    reason = %reason,
                                    "Worker exited"
                                );
                            }
                            if pool.worker_gone(slot.index()) {
                                readiness.emit();
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Failed to reap worker"),
                    }
                }
                if reaped && slots.iter().all(WorkerSlot::is_reaped) {
                    let failed = slots
                        .iter()
                        .filter(|s| s.exit_reason().is_some_and(|r| !r.is_clean()))
                        .count();
                    tracing::warn!(failed, "All workers have exited");
                }
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping workers");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping workers");
                break;
            }
        }
    }

    stop_workers(&mut slots, config.shutdown_grace).await;
    drop(link);
    Ok(())
}

/// SIGTERM every live worker, wait up to `grace`, then SIGKILL stragglers.
async fn stop_workers(slots: &mut [WorkerSlot], grace: Duration) {
    for slot in slots.iter().filter(|s| !s.is_reaped()) {
        if let Err(e) = slot.terminate() {
            tracing::debug!(error = %e, "SIGTERM failed");
        }
    }

    let deadline = Instant::now() + grace;
    loop {
        for slot in slots.iter_mut() {
            if let Ok(Some(reason)) = slot.try_reap() {
                tracing::info!(index = slot.index(), reason = %reason, "Worker stopped");
            }
        }
        if slots.iter().all(WorkerSlot::is_reaped) || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }

    for slot in slots.iter_mut().filter(|s| !s.is_reaped()) {
        match slot.kill() {
            Ok(reason) => tracing::warn!(
                index = slot.index(),
                reason = %reason,
                "Worker did not stop in time"
            ),
            Err(e) => tracing::error!(index = slot.index(), error = %e, "Failed to kill worker"),
        }
    }
}
