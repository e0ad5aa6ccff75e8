//! Error types for the migration sequencer.
//!
//! Severity is decided by the stage that observes the error, not by the
//! variant: a `Lookup` during discovery aborts the run, the same variant
//! while resolving a mount target only fails that datastore.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for vmig.
#[derive(Debug, Error)]
pub enum MigrationError {
    // Input errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // External system errors
    #[error("Cannot connect to {system}: {message}")]
    Connection { system: String, message: String },

    #[error("{kind} not found: {name}")]
    Lookup { kind: &'static str, name: String },

    #[error("Precondition failed for {unit}: {message}")]
    Precondition { unit: String, message: String },

    #[error("Mount failed for {datastore}: {message}")]
    Mount { datastore: String, message: String },

    #[error("Registration failed for {unit}: {message}")]
    Registration { unit: String, message: String },

    #[error("{operation} failed on {target}: {message}")]
    Operation {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Operation was cancelled")]
    Cancelled,

    // Transport errors
    #[error("HTTP {status} from {url}: {message}")]
    Api {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // File system and format errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("CSV error: {message}")]
    Csv {
        message: String,
        #[source]
        source: Option<csv::Error>,
    },
}

/// Result type alias for vmig operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for MigrationError {
    fn from(err: csv::Error) -> Self {
        MigrationError::Csv {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        MigrationError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MigrationError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MigrationError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MigrationError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn lookup(kind: &'static str, name: impl Into<String>) -> Self {
        MigrationError::Lookup {
            kind,
            name: name.into(),
        }
    }

    pub fn operation(
        operation: &'static str,
        target: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        MigrationError::Operation {
            operation,
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error must stop the whole run rather than a single unit.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::Validation { .. }
                | MigrationError::Connection { .. }
                | MigrationError::Lookup { .. }
                | MigrationError::Precondition { .. }
                | MigrationError::Cancelled
        )
    }

    /// Whether the request failed before reaching the server.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            MigrationError::Network { source: Some(e), .. } if e.is_connect()
        )
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Network { .. } => true,
            MigrationError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::lookup("VM", "web01");
        assert_eq!(err.to_string(), "VM not found: web01");

        let err = MigrationError::Timeout {
            what: "SnapMirror transfer".into(),
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 5s waiting for SnapMirror transfer"
        );
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(MigrationError::validation("VMName", "missing").is_run_fatal());
        assert!(MigrationError::Cancelled.is_run_fatal());
        assert!(!MigrationError::Mount {
            datastore: "ds1".into(),
            message: "no volume".into()
        }
        .is_run_fatal());
    }

    #[test]
    fn test_retryable_errors() {
        let server = MigrationError::Api {
            url: "https://ontap/api".into(),
            status: 503,
            message: "busy".into(),
        };
        assert!(server.is_retryable());

        let not_found = MigrationError::Api {
            url: "https://ontap/api".into(),
            status: 404,
            message: "missing".into(),
        };
        assert!(!not_found.is_retryable());
        assert!(!server.is_connect_failure());
    }
}
