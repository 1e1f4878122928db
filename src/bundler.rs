//! Build step: compiles component templates into render bundles.
//!
//! Every `*.html` template under the source directory becomes a
//! `*.bundle.json` file under the bundles directory, which workers load by
//! locator. A sibling `*.css` file is copied to the dist directory; in
//! production it is named `<name>-<build hash>.css`. A `manifest.json` in the
//! bundles directory maps each locator to its stylesheet.
//!
//! In production mode the bundler builds once, prints the readiness sentinel
//! and exits. In development mode it links to the host, serves handoffs
//! (answered with the log output captured since the previous handoff), builds,
//! prints the sentinel and then rebuilds whenever a source file changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::banner;
use crate::capture::LogCapture;
use crate::endpoint::{self, Endpoint};
use crate::error::{Result, SsrError};
use crate::liveness::LivenessLink;
use crate::paths::{self, TEMPLATE_EXTENSION};
use crate::readiness::{self, ReadinessSignal};
use crate::render::CompiledTemplate;
use crate::server::{self, Handoff};

/// Name of the build manifest inside the bundles directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const STYLESHEET_EXTENSION: &str = "css";

/// What to build and where.
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    pub source_dir: PathBuf,
    pub bundles_dir: PathBuf,
    pub dist_dir: PathBuf,
    /// Hash stylesheet names.
    pub production: bool,
    pub build_hash: String,
}

/// Locator to asset mapping written after every build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub build_hash: String,
    /// Stylesheet path relative to the dist directory, per locator.
    pub stylesheets: BTreeMap<String, String>,
}

/// Outcome of one build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Locators compiled successfully.
    pub compiled: Vec<String>,
    /// Templates that failed, with the error description.
    pub failures: Vec<(PathBuf, String)>,
    pub manifest: Manifest,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Generate a short random build hash.
pub fn random_build_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Compile every template under the source directory.
///
/// A template that fails to compile is reported and skipped; the remaining
/// ones are still built.
pub fn build(config: &BundlerConfig) -> Result<BuildReport> {
    let templates = paths::find_files(&config.source_dir, TEMPLATE_EXTENSION)?;
    let mut report = BuildReport {
        manifest: Manifest {
            build_hash: config.build_hash.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    for rel in &templates {
        match build_one(config, rel) {
            Ok((locator, stylesheet)) => {
                tracing::info!(locator = %locator, "Compiled bundle");
                if let Some(css) = stylesheet {
                    report.manifest.stylesheets.insert(locator.clone(), css);
                }
                report.compiled.push(locator);
            }
            Err(e) => {
                tracing::error!(template = %rel.display(), error = %e, "Failed to compile template");
                report.failures.push((rel.clone(), e.to_string()));
            }
        }
    }

    std::fs::create_dir_all(&config.bundles_dir)?;
    std::fs::write(
        config.bundles_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&report.manifest)?,
    )?;

    tracing::info!(
        compiled = report.compiled.len(),
        failed = report.failures.len(),
        build_hash = %config.build_hash,
        "Build finished"
    );
    Ok(report)
}

fn build_one(config: &BundlerConfig, rel: &Path) -> Result<(String, Option<String>)> {
    let source = std::fs::read_to_string(config.source_dir.join(rel))?;
    let template = CompiledTemplate::compile(rel.display().to_string(), &source)?;

    let bundle_rel = paths::bundle_relpath(rel);
    let locator = paths::locator_for(&bundle_rel).ok_or_else(|| SsrError::Template {
        source_name: rel.display().to_string(),
        message: "path is not valid UTF-8".into(),
    })?;

    let bundle_path = config.bundles_dir.join(&bundle_rel);
    if let Some(parent) = bundle_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&bundle_path, serde_json::to_string(&template)?)?;

    let css_rel = rel.with_extension(STYLESHEET_EXTENSION);
    let css_source = config.source_dir.join(&css_rel);
    if !css_source.is_file() {
        return Ok((locator, None));
    }

    let asset_rel = if config.production {
        hashed_name(&css_rel, &config.build_hash)
    } else {
        css_rel
    };
    let asset_path = config.dist_dir.join(&asset_rel);
    if let Some(parent) = asset_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(&css_source, &asset_path)?;

    let asset = asset_rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
    Ok((locator, Some(asset)))
}

/// `pages/home.css` becomes `pages/home-<hash>.css`.
fn hashed_name(rel: &Path, hash: &str) -> PathBuf {
    let stem = rel
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match rel.extension() {
        Some(ext) => format!("{}-{}.{}", stem, hash, ext.to_string_lossy()),
        None => format!("{}-{}", stem, hash),
    };
    rel.with_file_name(name)
}

/// Modification times of every source file, used to detect changes.
fn snapshot(source_dir: &Path) -> Result<BTreeMap<PathBuf, Option<SystemTime>>> {
    let mut files = paths::find_files(source_dir, TEMPLATE_EXTENSION)?;
    files.extend(paths::find_files(source_dir, STYLESHEET_EXTENSION)?);
    Ok(files
        .into_iter()
        .map(|rel| {
            let modified = std::fs::metadata(source_dir.join(&rel))
                .and_then(|m| m.modified())
                .ok();
            (rel, modified)
        })
        .collect())
}

/// Build once and print the sentinel. Build failures are logged only.
pub fn run_production(config: &BundlerConfig, sentinel: &str) -> Result<()> {
    banner::print(
        "bundler",
        "production build",
        &[
            ("source", config.source_dir.display().to_string()),
            ("bundles", config.bundles_dir.display().to_string()),
            ("build hash", config.build_hash.clone()),
        ],
    );

    let signal = ReadinessSignal::new(sentinel);
    match build(config) {
        Ok(report) if !report.is_success() => {
            tracing::error!(failed = report.failures.len(), "Build finished with errors");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Build failed"),
    }
    signal.emit();
    Ok(())
}

/// Development mode settings.
#[derive(Debug, Clone)]
pub struct DevOptions {
    pub endpoint: Endpoint,
    pub host_pid: Pid,
    pub ttl: Duration,
    pub sentinel: String,
    pub poll_interval: Duration,
    /// Log sink installed in the subscriber; drained on every handoff.
    pub capture: LogCapture,
}

/// Serve handoffs, build, signal and keep rebuilding until shut down.
pub fn run_development(config: BundlerConfig, options: DevOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(develop(config, options))
}

async fn develop(config: BundlerConfig, options: DevOptions) -> Result<()> {
    let listener = endpoint::bind(&options.endpoint).await?;
    let bound = listener.local_endpoint()?;

    let link = LivenessLink::link(options.host_pid, options.ttl);
    let handoff = Arc::new(Handoff::new(link, options.ttl).with_capture(options.capture.clone()));
    let app = server::handoff_router(handoff);

    banner::print(
        "bundler",
        &format!("watching {}", config.source_dir.display()),
        &[
            ("handoff", bound.to_string()),
            ("host pid", options.host_pid.to_string()),
            ("bundles", config.bundles_dir.display().to_string()),
        ],
    );

    let mut server = tokio::spawn(listener.serve(app, server::shutdown_signal()));

    let signal = ReadinessSignal::new(options.sentinel.clone());
    let first = config.clone();
    readiness::after_warm_up(
        async move {
            tokio::task::spawn_blocking(move || build(&first))
                .await
                .map_err(|e| SsrError::Render(format!("build task failed: {}", e)))?
        },
        &signal,
    )
    .await;
    options.capture.start();

    let mut last = snapshot(&config.source_dir).unwrap_or_default();
    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            joined = &mut server => {
                joined.map_err(|e| SsrError::Endpoint(format!("server task failed: {}", e)))??;
                break;
            }
            _ = ticker.tick() => {
                let current = match snapshot(&config.source_dir) {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to scan sources");
                        continue;
                    }
                };
                if current == last {
                    continue;
                }
                last = current;
                tracing::info!("Sources changed, rebuilding");
                let next = config.clone();
                match tokio::task::spawn_blocking(move || build(&next)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Rebuild failed"),
                    Err(e) => tracing::error!(error = %e, "Rebuild task failed"),
                }
            }
        }
    }

    options.capture.stop();
    if let Endpoint::Unix(ref path) = bound {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}
