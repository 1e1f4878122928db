//! Worker request handlers.
//!
//! Bundle resolution and rendering run in `tokio::task::spawn_blocking()`:
//! loading a bundle touches the filesystem and rendering is CPU-bound, and the
//! worker runs a single-threaded runtime.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    response::Html,
};
use std::sync::Arc;
use tracing::instrument;

use super::{AppState, Handoff};
use super::error::ApiError;
use super::types::{HandoffParams, HealthResponse, HealthStatus, RenderParams};
use crate::render::render_document;

/// Render a bundle into a full HTML document.
///
/// Waits until the worker has warmed up. Any failure (unknown bundle,
/// invalid props, component error) is a 500 with the error description; the
/// worker keeps serving.
#[instrument(skip_all)]
pub async fn render(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RenderParams>, QueryRejection>,
) -> Result<Html<String>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::internal(e.body_text()))?;
    state.wait_ready().await?;

    let registry = state.registry.clone();
    let result = tokio::task::spawn_blocking(move || {
        let (bundle, props) = params.into_request()?;
        let component = registry.resolve(&bundle.locator)?;
        tracing::debug!(locator = %bundle.locator, "Rendering bundle");
        render_document(component.as_ref(), &bundle, &props)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Render task panicked");
        ApiError::internal(format!("Render task failed: {}", e))
    })?;

    match result {
        Ok(html) => Ok(Html(html)),
        Err(e) => {
            tracing::warn!(error = %e, "Render failed");
            Err(e.into())
        }
    }
}

/// Accept a handoff to a new host pid.
///
/// Served for every path other than `/render` and `/health`.
#[instrument(skip_all)]
pub async fn handoff(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HandoffParams>, QueryRejection>,
) -> Result<String, ApiError> {
    accept_handoff(&state.handoff, params)
}

/// Handoff for processes that serve nothing else (the development bundler).
#[instrument(skip_all)]
pub async fn handoff_only(
    State(handoff): State<Arc<Handoff>>,
    params: Result<Query<HandoffParams>, QueryRejection>,
) -> Result<String, ApiError> {
    accept_handoff(&handoff, params)
}

fn accept_handoff(
    handoff: &Handoff,
    params: Result<Query<HandoffParams>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::internal(e.body_text()))?;
    handoff.accept(params.pid.as_deref()).map_err(|e| {
        tracing::warn!(error = %e, "Handoff rejected");
        e.into()
    })
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_ready() {
            HealthStatus::Ready
        } else {
            HealthStatus::Warming
        },
        index: state.handoff.index(),
        pid: std::process::id(),
        host_pid: state.handoff.host_pid().as_raw(),
    })
}
