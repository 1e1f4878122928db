//! Error types for ssr-pool.

use thiserror::Error;

/// Main error type for ssr-pool.
#[derive(Error, Debug)]
pub enum SsrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("Invalid bundle locator '{0}': must be a relative path inside the bundles directory")]
    InvalidLocator(String),

    #[error("Template error in {source_name}: {message}")]
    Template {
        source_name: String,
        message: String,
    },

    #[error("Invalid props: {0}")]
    InvalidProps(serde_json::Error),

    #[error("{failed} of {total} bundles failed to load")]
    Preload { failed: usize, total: usize },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Invalid pid: '{0}'")]
    InvalidPid(String),

    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),
}

/// Result type alias for ssr-pool operations.
pub type Result<T> = std::result::Result<T, SsrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_bundle_not_found_error_message() {
        let err = SsrError::BundleNotFound("pages/home".to_string());
        let msg = err.to_string();
        assert!(msg.contains("pages/home"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_invalid_locator_error_message() {
        let err = SsrError::InvalidLocator("../etc/passwd".to_string());
        let msg = err.to_string();
        assert!(msg.contains("../etc/passwd"));
        assert!(msg.contains("relative path"));
    }

    #[test]
    fn test_template_error_message() {
        let err = SsrError::Template {
            source_name: "home.html".to_string(),
            message: "unterminated placeholder".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("home.html"));
        assert!(msg.contains("unterminated"));
    }

    #[test]
    fn test_invalid_pid_error_message() {
        let err = SsrError::InvalidPid("abc".to_string());
        assert_eq!(err.to_string(), "Invalid pid: 'abc'");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: SsrError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid").unwrap_err();
        let err: SsrError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(SsrError::Render("boom".into()))
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }
}
