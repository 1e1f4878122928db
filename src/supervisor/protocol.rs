//! Side-channel protocol between workers and their supervisor.
//!
//! Workers send JSON datagrams to the supervisor's private Unix datagram
//! socket. Messages flow in one direction only; the supervisor never replies.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SsrError};

/// Message from a worker to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SupervisorMessage {
    /// Worker finished warm-up.
    #[serde(rename = "ready")]
    Ready {
        /// Worker index
        index: usize,
        /// Worker process id
        pid: u32,
    },

    /// Worker accepted a handoff to a new host pid.
    #[serde(rename = "handoff")]
    Handoff {
        /// Worker index
        index: usize,
        /// New host pid
        pid: i32,
    },
}

impl SupervisorMessage {
    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json =
            serde_json::to_string(self).expect("SupervisorMessage serialization failed");
        json.push('\n');
        json
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Worker-side sender for the supervisor side channel.
#[derive(Debug)]
pub struct Notifier {
    socket: UnixDatagram,
    target: PathBuf,
    index: usize,
}

impl Notifier {
    /// Create a notifier for the worker with `index`, addressing `target`.
    pub fn new(target: impl Into<PathBuf>, index: usize) -> Result<Self> {
        let socket = UnixDatagram::unbound()?;
        Ok(Self {
            socket,
            target: target.into(),
            index,
        })
    }

    /// Report that warm-up has concluded.
    pub fn ready(&self) -> Result<()> {
        self.send(&SupervisorMessage::Ready {
            index: self.index,
            pid: std::process::id(),
        })
    }

    /// Report a handoff to `host_pid`.
    pub fn handoff(&self, host_pid: i32) -> Result<()> {
        self.send(&SupervisorMessage::Handoff {
            index: self.index,
            pid: host_pid,
        })
    }

    fn send(&self, message: &SupervisorMessage) -> Result<()> {
        self.socket
            .send_to(message.to_line().as_bytes(), &self.target)
            .map_err(|e| {
                SsrError::Supervisor(format!(
                    "Failed to notify supervisor at {}: {}",
                    self.target.display(),
                    e
                ))
            })?;
        Ok(())
    }
}
