use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kiln operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or incomplete bake requests, rejected before any job runs
    #[error("invalid bake request: {message}")]
    InvalidRequest { message: String },

    /// A staged path resolved outside the staging root
    #[error("path '{path}' escapes the staging root '{root}'")]
    PathEscape { path: PathBuf, root: PathBuf },

    /// Artifact fetch failed after exhausting the retry budget
    #[error("failed to fetch artifact '{reference}' after {attempts} attempts: {message}")]
    Fetch {
        reference: String,
        attempts: u32,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Overlay descriptor resolution errors
    #[error("failed to resolve manifest dependencies at '{path}': {message}")]
    ResolveManifest { path: String, message: String },

    /// Fatal backend provisioning or job submission errors
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The executed bake command reported failure
    #[error("{}", format_execution_error(.name, .logs))]
    ExecutionFailed { name: String, logs: String },

    /// The bake was canceled before reaching a terminal state
    #[error("bake job '{job_id}' was canceled before completion")]
    Canceled { job_id: String },

    /// Operation timeout errors
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// YAML serialization/deserialization errors
    #[error("YAML error: {message}")]
    Yaml {
        message: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

fn format_execution_error(name: &str, logs: &str) -> String {
    if logs.is_empty() {
        format!("bake '{name}' failed with no captured output")
    } else {
        format!("bake '{name}' failed: {logs}")
    }
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Yaml {
            message: error.to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create an invalid-request error
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a path-escape error
    #[must_use]
    pub fn path_escape(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Error::PathEscape {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Create a fetch error without an underlying cause
    #[must_use]
    pub fn fetch(reference: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Error::Fetch {
            reference: reference.into(),
            attempts,
            message: message.into(),
            source: None,
        }
    }

    /// Create a fetch error carrying the final attempt's cause
    #[must_use]
    pub fn fetch_with_source(
        reference: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Fetch {
            reference: reference.into(),
            attempts,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a manifest resolution error
    #[must_use]
    pub fn resolve_manifest(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ResolveManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a backend error
    #[must_use]
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Error::Backend {
            backend,
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error with a source error
    #[must_use]
    pub fn backend_with_source(
        backend: &'static str,
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Backend {
            backend,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an execution-failed error
    #[must_use]
    pub fn execution_failed(name: impl Into<String>, logs: impl Into<String>) -> Self {
        Error::ExecutionFailed {
            name: name.into(),
            logs: logs.into(),
        }
    }

    /// Create a canceled error
    #[must_use]
    pub fn canceled(job_id: impl Into<String>) -> Self {
        Error::Canceled {
            job_id: job_id.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error was caused by a malformed request rather than a
    /// failure while executing it
    #[must_use]
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest { .. } | Error::PathEscape { .. } | Error::ResolveManifest { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_includes_logs() {
        let err = Error::execution_failed("my-release", "helm: chart not found");
        assert!(err.to_string().contains("my-release"));
        assert!(err.to_string().contains("chart not found"));
    }

    #[test]
    fn invalid_request_classification() {
        assert!(Error::invalid_request("no artifacts").is_invalid_request());
        assert!(Error::path_escape("../../etc", "/tmp/kiln").is_invalid_request());
        assert!(!Error::canceled("abc").is_invalid_request());
    }
}
