//! ssr - supervised server-side render workers

mod banner;
mod bundler;
mod capture;
mod cli;
mod endpoint;
mod error;
mod liveness;
mod logging;
mod paths;
mod readiness;
mod render;
mod server;
mod supervisor;

use std::ffi::OsString;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use capture::LogCapture;
use cli::{BundleArgs, Cli, Commands, SuperviseArgs, WorkerArgs};
use logging::LogConfig;

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    // The development bundler hands captured log output to whoever takes over.
    let capture = match &cli.command {
        Commands::Bundle(args) if !args.production => Some(LogCapture::new()),
        _ => None,
    };
    logging::init(log_config(&cli, capture.clone()));

    let result = match &cli.command {
        Commands::Supervise(args) => cmd_supervise(&cli, args),
        Commands::Worker(args) => cmd_worker(args),
        Commands::Bundle(args) => cmd_bundle(args, capture),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn log_config(cli: &Cli, capture: Option<LogCapture>) -> LogConfig {
    let mut config = LogConfig::from_verbosity(cli.verbose).with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    if let Some(capture) = capture {
        config = config.with_capture(capture);
    }
    config
}

/// Logging flags a supervisor passes on to its workers.
fn forwarded_log_args(cli: &Cli) -> Vec<OsString> {
    let mut args = Vec::new();
    if cli.verbose > 0 {
        args.push(format!("-{}", "v".repeat(cli.verbose as usize)).into());
    }
    if let Some(format) = cli.log_format {
        args.push("--log-format".into());
        args.push(format.to_string().into());
    }
    if let Some(path) = &cli.log_file {
        args.push("--log-file".into());
        args.push(path.clone().into_os_string());
    }
    if cli.no_color {
        args.push("--no-color".into());
    }
    args
}

fn cmd_supervise(cli: &Cli, args: &SuperviseArgs) -> Result<()> {
    let config = supervisor::SupervisorConfig {
        workers: args.workers,
        host_pid: args.link.host_pid(),
        ttl: args.link.ttl(),
        sentinel: args.link.signal.clone(),
        endpoints: args.endpoint.to_config(),
        bundles_dir: args.render.bundles_dir.clone(),
        cache_policy: args.render.cache_policy(),
        ready_timeout: Duration::from_secs(args.ready_timeout),
        shutdown_grace: Duration::from_secs(args.shutdown_grace),
        log_args: forwarded_log_args(cli),
    };
    supervisor::run(config).context("Supervisor failed")?;
    Ok(())
}

fn cmd_worker(args: &WorkerArgs) -> Result<()> {
    let endpoint = args
        .endpoint
        .to_config()
        .for_index(args.index.unwrap_or(0))
        .context("Failed to derive worker endpoint")?;

    let config = server::WorkerConfig {
        index: args.index,
        endpoint,
        host_pid: args.link.host_pid(),
        ttl: args.link.ttl(),
        bundles_dir: args.render.bundles_dir.clone(),
        cache_policy: args.render.cache_policy(),
        sentinel: args.link.signal.clone(),
        supervisor_socket: args.supervisor_socket.clone(),
    };
    server::run_worker(config).context("Worker failed")?;
    Ok(())
}

fn cmd_bundle(args: &BundleArgs, capture: Option<LogCapture>) -> Result<()> {
    let config = bundler::BundlerConfig {
        source_dir: args.source_dir.clone(),
        bundles_dir: args.bundles_dir.clone(),
        dist_dir: args.dist_dir.clone(),
        production: args.production,
        build_hash: args
            .build_hash
            .clone()
            .unwrap_or_else(bundler::random_build_hash),
    };

    if args.production {
        bundler::run_production(&config, &args.link.signal)?;
        return Ok(());
    }

    let endpoint = match &args.socket {
        Some(path) => endpoint::Endpoint::Unix(path.clone()),
        None => endpoint::Endpoint::Unix(paths::bundler_socket_path(&args.socket_dir)),
    };
    let options = bundler::DevOptions {
        endpoint,
        host_pid: args.link.host_pid(),
        ttl: args.link.ttl(),
        sentinel: args.link.signal.clone(),
        poll_interval: Duration::from_millis(args.poll_interval),
        capture: capture.unwrap_or_default(),
    };
    bundler::run_development(config, options).context("Bundler failed")?;
    Ok(())
}
