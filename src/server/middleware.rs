//! HTTP middleware for the worker endpoint.
//!
//! Provides request correlation IDs.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request correlation IDs.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID stored in request extensions.
#[allow(dead_code)] // Read by handlers through the extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Middleware that adds request correlation IDs to each request.
///
/// If the request includes an `X-Request-ID` header, that value is used.
/// Otherwise, a new UUIDv4 is generated. The id is stored in request
/// extensions, recorded on a tracing span around the request, and echoed in
/// the response `X-Request-ID` header.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(X_REQUEST_ID.clone(), header_value);
    }

    response
}
