//! Render worker: a local HTTP endpoint with render and handoff operations.
//!
//! # Routes
//!
//! - `GET /render?bundle=<locator>&script=<url>&stylesheet=<url>&props=<json>`
//!   renders a full HTML document.
//! - `GET /health` reports warm-up state as JSON.
//! - Any other path is a handoff: `GET /?pid=<int>` retargets the worker's
//!   liveness link to a new host pid.
//!
//! # Example
//!
//! ```bash
//! ssr worker --socket /tmp/renderer.sock --host-pid $$ &
//! curl --unix-socket /tmp/renderer.sock \
//!     "http://localhost/render?bundle=pages/home&script=/static/home.js&props=%7B%7D"
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware::from_fn, routing::get};
use nix::unistd::Pid;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::banner;
use crate::capture::LogCapture;
use crate::endpoint::{self, Endpoint};
use crate::error::{Result, SsrError};
use crate::liveness::LivenessLink;
use crate::readiness::{self, ReadinessSignal};
use crate::render::{CachePolicy, FileLoader, Registry};
use crate::supervisor::protocol::Notifier;

/// Handoff handling shared by workers and the development bundler.
#[derive(Debug)]
pub struct Handoff {
    link: LivenessLink,
    ttl: Duration,
    index: Option<usize>,
    notifier: Option<Notifier>,
    /// Drained into the handoff response body when present.
    capture: Option<LogCapture>,
}

impl Handoff {
    pub fn new(link: LivenessLink, ttl: Duration) -> Self {
        Self {
            link,
            ttl,
            index: None,
            notifier: None,
            capture: None,
        }
    }

    /// Report accepted handoffs to a supervisor.
    pub fn with_notifier(mut self, index: usize, notifier: Notifier) -> Self {
        self.index = Some(index);
        self.notifier = Some(notifier);
        self
    }

    pub fn with_index(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }

    /// Answer handoffs with the logs captured since the previous one.
    pub fn with_capture(mut self, capture: LogCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn host_pid(&self) -> Pid {
        self.link.target()
    }

    /// Relink to the pid in `raw_pid` and return the response body.
    ///
    /// The relink completes before this returns. A failure to notify the
    /// supervisor is logged and does not fail the handoff.
    pub fn accept(&self, raw_pid: Option<&str>) -> Result<String> {
        let pid = parse_pid(raw_pid)?;
        self.link.relink(pid, self.ttl);
        tracing::info!(host_pid = pid.as_raw(), "Handoff accepted");

        if let Some(ref notifier) = self.notifier
            && let Err(e) = notifier.handoff(pid.as_raw())
        {
            tracing::warn!(error = %e, "Failed to report handoff to supervisor");
        }

        Ok(self
            .capture
            .as_ref()
            .map(LogCapture::drain)
            .unwrap_or_default())
    }
}

/// Parse a host pid. Zero and negative values address process groups and
/// are rejected.
fn parse_pid(raw: Option<&str>) -> Result<Pid> {
    let raw = raw.unwrap_or_default();
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Pid::from_raw(pid)),
        _ => Err(SsrError::InvalidPid(raw.to_string())),
    }
}

/// Shared worker state.
#[derive(Debug)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub handoff: Handoff,
    ready: watch::Receiver<bool>,
}

impl AppState {
    /// Create state together with the sender that opens the readiness gate.
    pub fn new(registry: Arc<Registry>, handoff: Handoff) -> (Self, watch::Sender<bool>) {
        let (ready_tx, ready_rx) = watch::channel(false);
        (
            Self {
                registry,
                handoff,
                ready: ready_rx,
            },
            ready_tx,
        )
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until warm-up has concluded.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| SsrError::Render("worker stopped before warm-up completed".into()))?;
        Ok(())
    }
}

/// Build the worker router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/render", get(handlers::render))
        .route("/health", get(handlers::health))
        .fallback(handlers::handoff)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a router that treats every request as a handoff.
pub fn handoff_router(handoff: Arc<Handoff>) -> Router {
    Router::new()
        .fallback(handlers::handoff_only)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(handoff)
}

/// Worker launch configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pool index, when part of a pool.
    pub index: Option<usize>,
    pub endpoint: Endpoint,
    pub host_pid: Pid,
    pub ttl: Duration,
    pub bundles_dir: PathBuf,
    pub cache_policy: CachePolicy,
    pub sentinel: String,
    /// Supervisor side channel; standalone workers emit the sentinel themselves.
    pub supervisor_socket: Option<PathBuf>,
}

/// Run a worker to completion on a single-threaded runtime.
pub fn run_worker(config: WorkerConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve_worker(config))
}

async fn serve_worker(config: WorkerConfig) -> Result<()> {
    let listener = endpoint::bind(&config.endpoint).await?;
    let bound = listener.local_endpoint()?;

    let link = LivenessLink::link(config.host_pid, config.ttl);
    let handoff = match (&config.supervisor_socket, config.index) {
        (Some(path), Some(index)) => {
            Handoff::new(link, config.ttl).with_notifier(index, Notifier::new(path, index)?)
        }
        (Some(_), None) => {
            return Err(SsrError::Supervisor(
                "a supervised worker needs an --index".into(),
            ));
        }
        (None, index) => Handoff::new(link, config.ttl).with_index(index),
    };

    let registry = Arc::new(Registry::new(
        FileLoader::new(&config.bundles_dir),
        config.cache_policy,
    ));
    let (state, ready_tx) = AppState::new(registry.clone(), handoff);
    let state = Arc::new(state);
    let app = build_router(state.clone());

    let role = match config.index {
        Some(index) => format!("worker {}", index),
        None => "worker".to_string(),
    };
    banner::print(
        &role,
        &format!("listening on {}", bound),
        &[
            ("pid", std::process::id().to_string()),
            ("host pid", config.host_pid.to_string()),
            ("bundles", config.bundles_dir.display().to_string()),
        ],
    );

    let server = tokio::spawn(listener.serve(app, shutdown_signal()));

    let warm_up = async move {
        tokio::task::spawn_blocking(move || registry.preload())
            .await
            .map_err(|e| SsrError::Render(format!("warm-up task failed: {}", e)))?
    };

    match state.handoff.notifier.as_ref() {
        Some(notifier) => {
            if let Err(e) = warm_up.await {
                tracing::error!(error = %e, "Warm-up failed");
            }
            ready_tx.send_replace(true);
            if let Err(e) = notifier.ready() {
                tracing::warn!(error = %e, "Failed to report readiness to supervisor");
            }
        }
        None => {
            let signal = ReadinessSignal::new(config.sentinel.clone());
            let gate = async {
                let outcome = warm_up.await;
                ready_tx.send_replace(true);
                outcome
            };
            readiness::after_warm_up(gate, &signal).await;
        }
    }

    server
        .await
        .map_err(|e| SsrError::Endpoint(format!("server task failed: {}", e)))??;

    if let Endpoint::Unix(ref path) = bound {
        let _ = std::fs::remove_file(path);
    }
    tracing::info!("Worker stopped");
    Ok(())
}

/// Complete on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::Probe;
    use crate::render::CompiledTemplate;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct AlwaysAlive {
        calls: Arc<Mutex<Vec<Pid>>>,
    }

    impl Probe for AlwaysAlive {
        fn is_alive(&self, pid: Pid) -> bool {
            self.calls.lock().unwrap().push(pid);
            true
        }
    }

    fn test_link() -> LivenessLink {
        LivenessLink::with_probe(
            Pid::from_raw(500),
            Duration::from_secs(3600),
            AlwaysAlive::default(),
            |_| {},
        )
    }

    fn test_state(dir: &std::path::Path) -> (Arc<AppState>, watch::Sender<bool>) {
        let registry = Arc::new(Registry::new(FileLoader::new(dir), CachePolicy::Forever));
        registry.register(
            "pages/home",
            Arc::new(CompiledTemplate::compile("home.html", "<h1>{{ title }}</h1>").unwrap()),
        );
        let handoff = Handoff::new(test_link(), Duration::from_millis(1500));
        let (state, ready) = AppState::new(registry, handoff);
        (Arc::new(state), ready)
    }

    fn ready_state(dir: &std::path::Path) -> Arc<AppState> {
        let (state, ready) = test_state(dir);
        ready.send_replace(true);
        state
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String, Option<String>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap(), content_type)
    }

    #[tokio::test]
    async fn test_render_returns_document() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(ready_state(dir.path()));

        let (status, body, content_type) = get(
            app,
            "/render?bundle=pages/home&script=/static/home.js&stylesheet=/static/home.css&props=%7B%22title%22%3A%22Hi%22%7D",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(body.contains(r#"<div id="__ssr_root__"><h1>Hi</h1></div>"#));
        assert!(body.contains(r#"<link href="/static/home.css" rel="stylesheet">"#));
        assert!(body.contains(r#"<script src="/static/home.js"></script>"#));
    }

    #[tokio::test]
    async fn test_unknown_bundle_then_valid_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = ready_state(dir.path());

        let (status, body, content_type) = get(
            build_router(state.clone()),
            "/render?bundle=pages/missing&script=/s.js",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
        assert!(body.contains("pages/missing"));

        // The worker keeps serving
        let (status, body, _) =
            get(build_router(state), "/render?bundle=pages/home&script=/s.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<h1></h1>"));
    }

    #[tokio::test]
    async fn test_invalid_props_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(ready_state(dir.path()));
        let (status, body, _) = get(app, "/render?bundle=pages/home&script=/s.js&props=%7Bbad").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("Invalid props"));
    }

    #[tokio::test]
    async fn test_invalid_locator_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(ready_state(dir.path()));
        let (status, body, _) = get(app, "/render?bundle=../etc/passwd&script=/s.js").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Invalid bundle locator"));
    }

    #[tokio::test]
    async fn test_handoff_relinks() {
        let dir = tempfile::tempdir().unwrap();
        let state = ready_state(dir.path());

        let (status, body, _) = get(build_router(state.clone()), "/?pid=4321").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "");
        assert_eq!(state.handoff.host_pid(), Pid::from_raw(4321));

        // Any other path is also a handoff
        let (status, _, _) = get(build_router(state.clone()), "/anything?pid=4322").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.handoff.host_pid(), Pid::from_raw(4322));
    }

    #[tokio::test]
    async fn test_handoff_invalid_pid() {
        let dir = tempfile::tempdir().unwrap();
        let state = ready_state(dir.path());

        for uri in ["/?pid=abc", "/?pid=0", "/?pid=-5", "/"] {
            let (status, body, _) = get(build_router(state.clone()), uri).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert!(body.starts_with("Invalid pid"), "{uri}: {body}");
        }
        assert_eq!(state.handoff.host_pid(), Pid::from_raw(500));
    }

    #[tokio::test]
    async fn test_handoff_returns_captured_logs() {
        let capture = LogCapture::new();
        capture.start();
        let handoff = Handoff::new(test_link(), Duration::from_secs(1)).with_capture(capture.clone());

        std::io::Write::write_all(
            &mut tracing_subscriber::fmt::MakeWriter::make_writer(&capture),
            b"rebuilt pages/home\n",
        )
        .unwrap();

        assert_eq!(handoff.accept(Some("77")).unwrap(), "rebuilt pages/home\n");
        assert_eq!(handoff.accept(Some("78")).unwrap(), "");
    }

    #[tokio::test]
    async fn test_render_waits_for_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let (state, ready) = test_state(dir.path());
        let app = build_router(state.clone());

        let pending = tokio::spawn(get(app, "/render?bundle=pages/home&script=/s.js"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        let (status, _, _) = get(build_router(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);

        ready.send_replace(true);
        let (status, _, _) = pending.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        let (state, ready) = test_state(dir.path());

        let (_, body, _) = get(build_router(state.clone()), "/health").await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "warming");
        assert_eq!(value["host_pid"], 500);

        ready.send_replace(true);
        let (_, body, _) = get(build_router(state), "/health").await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "ready");
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid(Some("123")).unwrap(), Pid::from_raw(123));
        assert_eq!(parse_pid(Some(" 9 ")).unwrap(), Pid::from_raw(9));
        assert!(matches!(parse_pid(None), Err(SsrError::InvalidPid(_))));
        assert!(parse_pid(Some("1.5")).is_err());
    }
}
