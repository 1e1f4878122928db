//! API error handling.
//!
//! The host reads failure descriptions verbatim, so errors are plain text
//! rather than JSON.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::SsrError;

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// A 500 Internal Server Error carrying `message` as its body.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

impl From<SsrError> for ApiError {
    /// Every render or handoff failure is a 500 with the error description.
    fn from(err: SsrError) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_into_response_is_plain_text() {
        let response = ApiError::from(SsrError::BundleNotFound("pages/x".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "Bundle 'pages/x' not found");
    }
}
