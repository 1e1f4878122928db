//! Local endpoint addressing and binding.
//!
//! Every worker listens on its own address, derived from the launch
//! configuration and its index: `<socket_dir>/renderer-<index>.sock` by
//! default, or `<host>:<port + index>` when a base TCP port is configured.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use axum::Router;
use tokio::net::{TcpListener, UnixListener};

use crate::error::{Result, SsrError};
use crate::paths;

/// Address a worker listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "http://{}", addr),
        }
    }
}

/// Launch-time endpoint configuration shared by all workers of a pool.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Explicit socket path; only meaningful for a single process.
    pub socket: Option<PathBuf>,
    /// Directory for derived socket paths.
    pub socket_dir: PathBuf,
    /// Host for TCP endpoints.
    pub host: IpAddr,
    /// Base TCP port; worker `i` listens on `port + i`.
    pub port: Option<u16>,
}

impl EndpointConfig {
    /// Derive the endpoint of the worker with the given index.
    pub fn for_index(&self, index: usize) -> Result<Endpoint> {
        if let Some(ref socket) = self.socket {
            return Ok(Endpoint::Unix(socket.clone()));
        }

        match self.port {
            Some(base) => {
                let port = u16::try_from(index)
                    .ok()
                    .and_then(|offset| base.checked_add(offset))
                    .ok_or_else(|| {
                        SsrError::Endpoint(format!(
                            "port {} + index {} exceeds the TCP port range",
                            base, index
                        ))
                    })?;
                Ok(Endpoint::Tcp(SocketAddr::new(self.host, port)))
            }
            None => Ok(Endpoint::Unix(paths::worker_socket_path(
                &self.socket_dir,
                index,
            ))),
        }
    }
}

/// A bound listener of either transport.
#[derive(Debug)]
pub enum BoundListener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

impl BoundListener {
    /// The address actually bound (resolves port 0 for TCP).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Self::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
            Self::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
        }
    }

    /// Serve `app` until `shutdown` completes.
    pub async fn serve<F>(self, app: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Unix(listener, _) => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await?
            }
            Self::Tcp(listener) => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await?
            }
        }
        Ok(())
    }
}

/// Bind `endpoint`, replacing a stale socket file left by a previous run.
pub async fn bind(endpoint: &Endpoint) -> Result<BoundListener> {
    match endpoint {
        Endpoint::Unix(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            let listener = UnixListener::bind(path).map_err(|e| {
                SsrError::Endpoint(format!("failed to bind {}: {}", path.display(), e))
            })?;
            Ok(BoundListener::Unix(listener, path.clone()))
        }
        Endpoint::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| SsrError::Endpoint(format!("failed to bind {}: {}", addr, e)))?;
            Ok(BoundListener::Tcp(listener))
        }
    }
}
