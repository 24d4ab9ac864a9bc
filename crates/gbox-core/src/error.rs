//! Error types for gbox-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gbox-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during box operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Remote entity does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Action is invalid for the remote entity's current state (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other 4xx/5xx response from the service.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// The body's JSON `message` field, or the whole body
        message: String,
        /// Raw response body, untouched
        body: String,
    },

    /// Non-HTTP failure: network unreachable, timeout, malformed response.
    #[error("request failed: {0}")]
    Generic(String),

    /// Host path handed to a copy operation does not exist.
    #[error("local source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Host filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    LocalIo {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Tar build or parse failure.
    #[error("archive error: {0}")]
    Archive(String),

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// True when the remote side reported the entity as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(CoreError::NotFound("box-1".into()).is_not_found());
        assert!(!CoreError::Conflict("box-1".into()).is_not_found());
        assert!(!CoreError::Cancelled.is_not_found());
    }

    #[test]
    fn test_api_error_display() {
        let err = CoreError::Api {
            status: 503,
            message: "unavailable".into(),
            body: r#"{"message":"unavailable"}"#.into(),
        };
        assert_eq!(err.to_string(), "API error (503): unavailable");
    }

    #[test]
    fn test_source_not_found_carries_path() {
        let err = CoreError::SourceNotFound(PathBuf::from("/tmp/missing.txt"));
        assert!(err.to_string().contains("/tmp/missing.txt"));
    }
}
