//! Worker subprocess spawning.
//!
//! Workers are started by re-executing the current binary in `worker` mode
//! through `std::process::Command`, with the pool configuration forwarded as
//! arguments.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::Pid;

use super::SupervisorConfig;
use super::slot::WorkerSlot;
use crate::error::{Result, SsrError};

/// Build the command line for worker `index`.
pub fn worker_command(
    exe: &Path,
    config: &SupervisorConfig,
    index: usize,
    side_channel: &Path,
) -> Command {
    let mut cmd = Command::new(exe);
    cmd.arg("worker");
    cmd.args(worker_args(config, index, side_channel));

    // Banners and the sentinel share the parent's streams
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    cmd
}

fn worker_args(config: &SupervisorConfig, index: usize, side_channel: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--index".into(),
        index.to_string().into(),
        "--host-pid".into(),
        config.host_pid.as_raw().to_string().into(),
        "--worker-ttl".into(),
        config.ttl.as_millis().to_string().into(),
        "--signal".into(),
        config.sentinel.clone().into(),
        "--socket-dir".into(),
        config.endpoints.socket_dir.clone().into(),
        "--host".into(),
        config.endpoints.host.to_string().into(),
        "--bundles-dir".into(),
        config.bundles_dir.clone().into(),
        "--supervisor-socket".into(),
        side_channel.into(),
    ];
    if let Some(ref socket) = config.endpoints.socket {
        args.push("--socket".into());
        args.push(socket.clone().into());
    }
    if let Some(port) = config.endpoints.port {
        args.push("--port".into());
        args.push(port.to_string().into());
    }
    if config.cache_policy == crate::render::CachePolicy::Reload {
        args.push("--reload".into());
    }
    args.extend(config.log_args.iter().cloned());
    args
}

/// Spawn worker `index` and return its slot.
pub fn spawn_worker(
    config: &SupervisorConfig,
    index: usize,
    side_channel: &Path,
) -> Result<WorkerSlot> {
    let exe = std::env::current_exe()
        .map_err(|e| SsrError::Supervisor(format!("Failed to get current executable: {}", e)))?;
    let endpoint = config.endpoints.for_index(index)?;

    let child = worker_command(&exe, config, index, side_channel)
        .spawn()
        .map_err(|e| SsrError::Supervisor(format!("Failed to spawn worker {}: {}", index, e)))?;

    let pid = Pid::from_raw(child.id() as i32);
    tracing::debug!(index, pid = pid.as_raw(), endpoint = %endpoint, "Worker spawned");
    Ok(WorkerSlot::new(index, pid, endpoint))
}
