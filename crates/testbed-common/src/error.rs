//! Unified error types for the testbed workspace.
//!
//! Every crate returns [`TestbedError`]. Failures that leave the system in a
//! retryable state (a server that did not become ready) are absorbed by the
//! lifecycle controller and only surface once its retry budget is spent.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TestbedError {
    /// The container engine cannot be reached.
    #[error("cannot connect to the container engine at {endpoint}: {message}")]
    Connectivity {
        /// Endpoint that was tried (socket path or `DOCKER_HOST` value).
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// Pulling or building an image failed.
    #[error("failed to acquire image {image}: {message}")]
    ImageAcquisition {
        /// Image reference being acquired.
        image: String,
        /// Description of the failure.
        message: String,
    },

    /// Every start attempt allowed by the start policy failed its readiness check.
    #[error("server from image {image} did not become ready after {attempts} attempt(s)")]
    StartAttemptsExhausted {
        /// Image the server was started from.
        image: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Connection settings would overwrite an existing file.
    #[error("settings cannot be written to a file that already exists: {path}")]
    SettingsExist {
        /// Path of the existing file.
        path: PathBuf,
    },

    /// An operation was called in the wrong lifecycle state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state violation.
        message: String,
    },

    /// A container engine call failed.
    #[error("container engine {operation} failed: {message}")]
    Runtime {
        /// Engine operation that failed (e.g. `create`, `exec`).
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A client command wrote to stderr or could not be run.
    #[error("{command} failed:\nError: {stderr}\nOutput: {stdout}")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl TestbedError {
    /// Builds an [`TestbedError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns whether this error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TestbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_exist_message_names_path() {
        let err = TestbedError::SettingsExist {
            path: PathBuf::from("/tmp/.irodsEnv"),
        };
        assert!(err.to_string().contains("/tmp/.irodsEnv"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn not_found_is_detected() {
        let err = TestbedError::NotFound {
            kind: "container",
            id: "irods-1".into(),
        };
        assert!(err.is_not_found());
        assert!(!TestbedError::Config { message: "x".into() }.is_not_found());
    }
}
