//! Command-line interface definitions using clap.

use crate::endpoint::EndpointConfig;
use crate::logging::LogFormat;
use crate::paths;
use crate::readiness::DEFAULT_SENTINEL;
use crate::render::CachePolicy;
use clap::{Args, Parser, Subcommand};
use nix::unistd::Pid;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Server-side rendering worker pool tied to the lifetime of a host process.
#[derive(Parser, Debug)]
#[command(name = "ssr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format: pretty, compact or json.
    #[arg(long, global = true, env = "SSR_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file (rotated daily).
    #[arg(long, global = true, env = "SSR_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spawn one render worker per processing unit and supervise them.
    Supervise(SuperviseArgs),

    /// Run a single render worker.
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Compile component templates into render bundles.
    Bundle(BundleArgs),
}

/// Liveness link and readiness options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Pid of the host process; exit when it is gone (default: parent pid).
    #[arg(long, env = "SSR_HOST_PID", value_parser = clap::value_parser!(i32).range(1..))]
    pub host_pid: Option<i32>,

    /// Liveness check interval in milliseconds.
    #[arg(
        long,
        env = "SSR_WORKER_TTL",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub worker_ttl: u64,

    /// Sentinel line printed once warm-up has concluded.
    #[arg(long, env = "SSR_SIGNAL", default_value = DEFAULT_SENTINEL)]
    pub signal: String,
}

impl LinkArgs {
    /// The process to link to.
    pub fn host_pid(&self) -> Pid {
        self.host_pid.map(Pid::from_raw).unwrap_or_else(Pid::parent)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.worker_ttl)
    }
}

/// Where workers listen.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Explicit Unix socket path (single worker only).
    #[arg(long, env = "SSR_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Directory for worker sockets.
    #[arg(long, env = "SSR_SOCKET_DIR", default_value_os_t = paths::get_runtime_dir())]
    pub socket_dir: PathBuf,

    /// Host for TCP endpoints.
    #[arg(long, env = "SSR_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Base TCP port; worker i listens on port + i. Unix sockets when unset.
    #[arg(long, env = "SSR_PORT")]
    pub port: Option<u16>,
}

impl EndpointArgs {
    pub fn to_config(&self) -> EndpointConfig {
        EndpointConfig {
            socket: self.socket.clone(),
            socket_dir: self.socket_dir.clone(),
            host: self.host,
            port: self.port,
        }
    }
}

/// Bundle lookup options for workers.
#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Directory of compiled bundles.
    #[arg(long, env = "SSR_BUNDLES_DIR", default_value_os_t = paths::default_bundles_dir())]
    pub bundles_dir: PathBuf,

    /// Reload bundles when they change on disk.
    #[arg(long)]
    pub reload: bool,
}

impl RenderArgs {
    pub fn cache_policy(&self) -> CachePolicy {
        if self.reload {
            CachePolicy::Reload
        } else {
            CachePolicy::Forever
        }
    }
}

/// Arguments for the supervise command.
#[derive(Parser, Debug)]
pub struct SuperviseArgs {
    #[command(flatten)]
    pub link: LinkArgs,

    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub render: RenderArgs,

    /// Number of render workers.
    #[arg(short, long, env = "SSR_WORKERS", default_value_t = num_cpus())]
    pub workers: usize,

    /// Seconds to wait for every worker to report ready.
    #[arg(long, default_value_t = 30)]
    pub ready_timeout: u64,

    /// Seconds workers get to exit after SIGTERM before being killed.
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,
}

/// Arguments for the (internal) worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub link: LinkArgs,

    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub render: RenderArgs,

    /// Position of this worker in the pool.
    #[arg(long, env = "SSR_INDEX")]
    pub index: Option<usize>,

    /// Supervisor side-channel socket.
    #[arg(long, env = "SSR_SUPERVISOR_SOCKET")]
    pub supervisor_socket: Option<PathBuf>,
}

/// Arguments for the bundle command.
#[derive(Parser, Debug)]
pub struct BundleArgs {
    #[command(flatten)]
    pub link: LinkArgs,

    /// Directory of component templates.
    #[arg(long, env = "SSR_SOURCE_DIR", default_value = "components")]
    pub source_dir: PathBuf,

    /// Output directory for compiled bundles.
    #[arg(long, env = "SSR_BUNDLES_DIR", default_value_os_t = paths::default_bundles_dir())]
    pub bundles_dir: PathBuf,

    /// Output directory for client assets.
    #[arg(long, env = "SSR_DIST_DIR", default_value_os_t = paths::default_dist_dir())]
    pub dist_dir: PathBuf,

    /// Build once, signal and exit instead of watching.
    #[arg(long)]
    pub production: bool,

    /// Build hash used in asset names (default: random).
    #[arg(long)]
    pub build_hash: Option<String>,

    /// Handoff socket of the development bundler.
    #[arg(long, env = "SSR_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Directory for the development bundler socket.
    #[arg(long, env = "SSR_SOCKET_DIR", default_value_os_t = paths::get_runtime_dir())]
    pub socket_dir: PathBuf,

    /// Milliseconds between source change checks in development mode.
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parsing() {
        // Verify the CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_supervise_defaults() {
        let args = Cli::try_parse_from(["ssr", "supervise", "--host-pid", "42"]).unwrap();
        match args.command {
            Commands::Supervise(sup) => {
                assert_eq!(sup.link.host_pid(), Pid::from_raw(42));
                assert_eq!(sup.link.ttl(), Duration::from_millis(1000));
                assert!(sup.workers >= 1);
                assert_eq!(sup.ready_timeout, 30);
                assert!(sup.endpoint.port.is_none());
                assert_eq!(sup.render.cache_policy(), CachePolicy::Forever);
            }
            _ => panic!("Expected Supervise command"),
        }
    }

    #[test]
    fn test_host_pid_must_be_positive() {
        // 0 and negative pids address process groups, which are always alive
        for pid in ["0", "-1", "-42"] {
            let arg = format!("--host-pid={}", pid);
            assert!(Cli::try_parse_from(["ssr", "supervise", arg.as_str()]).is_err());
            assert!(Cli::try_parse_from(["ssr", "worker", arg.as_str()]).is_err());
            assert!(Cli::try_parse_from(["ssr", "bundle", arg.as_str()]).is_err());
        }
        assert!(Cli::try_parse_from(["ssr", "worker", "--host-pid", "1"]).is_ok());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        assert!(Cli::try_parse_from(["ssr", "worker", "--worker-ttl", "0"]).is_err());
        assert!(Cli::try_parse_from(["ssr", "supervise", "--worker-ttl", "0"]).is_err());
        assert!(Cli::try_parse_from(["ssr", "bundle", "--poll-interval", "0"]).is_err());

        let args = Cli::try_parse_from(["ssr", "bundle", "--poll-interval", "1", "--worker-ttl", "1"])
            .unwrap();
        match args.command {
            Commands::Bundle(bundle) => {
                assert_eq!(bundle.poll_interval, 1);
                assert_eq!(bundle.link.ttl(), Duration::from_millis(1));
            }
            _ => panic!("Expected Bundle command"),
        }
    }

    #[test]
    fn test_supervise_with_options() {
        let args = Cli::try_parse_from([
            "ssr",
            "supervise",
            "--workers",
            "4",
            "--port",
            "9000",
            "--worker-ttl",
            "250",
            "--signal",
            "abc123",
            "--reload",
        ])
        .unwrap();
        match args.command {
            Commands::Supervise(sup) => {
                assert_eq!(sup.workers, 4);
                assert_eq!(sup.endpoint.port, Some(9000));
                assert_eq!(sup.link.ttl(), Duration::from_millis(250));
                assert_eq!(sup.link.signal, "abc123");
                assert_eq!(sup.render.cache_policy(), CachePolicy::Reload);
            }
            _ => panic!("Expected Supervise command"),
        }
    }

    #[test]
    fn test_worker_command() {
        let args = Cli::try_parse_from([
            "ssr",
            "worker",
            "--index",
            "2",
            "--supervisor-socket",
            "/tmp/sup.sock",
        ])
        .unwrap();
        match args.command {
            Commands::Worker(worker) => {
                assert_eq!(worker.index, Some(2));
                assert_eq!(
                    worker.supervisor_socket,
                    Some(PathBuf::from("/tmp/sup.sock"))
                );
                assert_eq!(worker.link.signal, DEFAULT_SENTINEL);
            }
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_bundle_command() {
        let args = Cli::try_parse_from(["ssr", "bundle", "--production"]).unwrap();
        match args.command {
            Commands::Bundle(bundle) => {
                assert!(bundle.production);
                assert_eq!(bundle.source_dir, PathBuf::from("components"));
                assert_eq!(bundle.poll_interval, 500);
            }
            _ => panic!("Expected Bundle command"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Cli::try_parse_from([
            "ssr",
            "worker",
            "-vv",
            "--log-format",
            "json",
            "--no-color",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_format, Some(LogFormat::Json));
        assert!(args.no_color);
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["ssr", "--log-format", "xml", "worker"]).is_err());
    }

    #[test]
    fn test_endpoint_args_to_config() {
        let args = Cli::try_parse_from(["ssr", "worker", "--socket-dir", "/run/x"]).unwrap();
        match args.command {
            Commands::Worker(worker) => {
                let config = worker.endpoint.to_config();
                assert_eq!(config.socket_dir, PathBuf::from("/run/x"));
                assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
            }
            _ => panic!("Expected Worker command"),
        }
    }
}
