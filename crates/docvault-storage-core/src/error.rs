//! Error types for the docvault storage layer.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the storage layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Bad input: empty name or path, oversized payload, disallowed MIME type
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Storage backend error (network, 5xx, filesystem)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Attempt or retry sequence exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Checksum mismatch between stored and received content
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Operation not supported by this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Circuit breaker rejected the call without contacting the backend
    #[error("Circuit breaker is open for backend {backend}")]
    CircuitOpen { backend: String },

    /// Every candidate backend failed
    #[error("All storage backends failed: {}", format_failures(.failures))]
    AllBackendsFailed { failures: Vec<BackendFailure> },
}

/// One backend's failure inside an aggregate error.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.backend, self.message)
    }
}

fn format_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error classification used for retry, circuit-breaker and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transient,
    Integrity,
    Configuration,
    Unsupported,
    CircuitOpen,
}

impl ErrorKind {
    /// Only transient backend failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Label used in metrics and outcome records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the storage error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Serialization(_) => ErrorKind::Integrity,
            Error::Io(_) => ErrorKind::Transient,
            Error::Storage(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Storage(StorageError::Validation(message.into()))
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::Storage(StorageError::NotFound(path.into()))
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Error::Storage(StorageError::Backend(message.into()))
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Validation(_) => ErrorKind::Validation,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Backend(_) | StorageError::Timeout(_) => ErrorKind::Transient,
            StorageError::Integrity(_) => ErrorKind::Integrity,
            StorageError::Unsupported(_) => ErrorKind::Unsupported,
            StorageError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            StorageError::AllBackendsFailed { failures } => {
                let mut kinds = failures.iter().map(|f| f.kind);
                match kinds.next() {
                    Some(first) if kinds.all(|k| k == first) => first,
                    _ => ErrorKind::Transient,
                }
            }
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => {
                Error::Storage(StorageError::NotFound(path))
            }
            object_store::Error::AlreadyExists { path, .. } => Error::Storage(
                StorageError::Validation(format!("Object already exists: {}", path)),
            ),
            object_store::Error::NotSupported { source } => {
                Error::Storage(StorageError::Unsupported(source.to_string()))
            }
            other => Error::Storage(StorageError::Backend(other.to_string())),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::backend("x").kind(), ErrorKind::Transient);
        assert_eq!(
            Error::Storage(StorageError::Timeout("x".into())).kind(),
            ErrorKind::Transient
        );
        assert!(Error::backend("x").is_retryable());
        assert!(!Error::Storage(StorageError::Integrity("x".into())).is_retryable());
        assert!(!Error::Config("x".into()).is_retryable());
    }

    #[test]
    fn test_aggregate_kind_agrees() {
        let err = StorageError::AllBackendsFailed {
            failures: vec![
                BackendFailure {
                    backend: "s3".into(),
                    kind: ErrorKind::NotFound,
                    message: "gone".into(),
                },
                BackendFailure {
                    backend: "local".into(),
                    kind: ErrorKind::NotFound,
                    message: "gone".into(),
                },
            ],
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("[s3] gone"));
        assert!(err.to_string().contains("[local] gone"));
    }

    #[test]
    fn test_aggregate_kind_mixed_is_transient() {
        let err = StorageError::AllBackendsFailed {
            failures: vec![
                BackendFailure {
                    backend: "s3".into(),
                    kind: ErrorKind::Transient,
                    message: "503".into(),
                },
                BackendFailure {
                    backend: "local".into(),
                    kind: ErrorKind::NotFound,
                    message: "gone".into(),
                },
            ],
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
