//! Error types for the provider.
//!
//! Messages are lower-case and always carry the value that caused the
//! failure (remote, architecture, flavor, path) so the orchestrator log is
//! enough to find the root cause.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used at the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Transport,
    NotFound,
    Schema,
    AsyncOperation,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Caller input
    // ------------------------------------------------------------------
    #[error("{0}")]
    Validation(String),

    #[error("schema validation failed: {0}")]
    Schema(String),

    // ------------------------------------------------------------------
    // Operator configuration
    // ------------------------------------------------------------------
    #[error("image does not include a remote: {image}")]
    MissingRemote { image: String },

    #[error("could not find {image} in {configured:?}")]
    UnknownRemote {
        image: String,
        configured: Vec<String>,
    },

    #[error("could not find image {image} for architecture {arch}")]
    ArchitectureNotFound { image: String, arch: String },

    #[error("looking for profile {flavor}: not found")]
    ProfileNotFound { flavor: String },

    #[error("architecture {arch} is not supported")]
    UnsupportedArchitecture { arch: String },

    #[error("failed to find tools for OS {os} and arch {arch}")]
    Tools { os: String, arch: String },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    // ------------------------------------------------------------------
    // Endpoint
    // ------------------------------------------------------------------
    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation}: instance {name} not found: {message}")]
    NotFound {
        operation: String,
        name: String,
        message: String,
    },

    #[error("{operation}: operation failed: {message}")]
    AsyncOperation { operation: String, message: String },

    #[error("{operation}: endpoint returned {status}: {message}")]
    Endpoint {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation}: cancelled")]
    Cancelled { operation: String },

    // ------------------------------------------------------------------
    // Boundary I/O
    // ------------------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Json(_) => ErrorKind::Validation,
            Error::Schema(_) => ErrorKind::Schema,
            Error::MissingRemote { .. }
            | Error::UnknownRemote { .. }
            | Error::ArchitectureNotFound { .. }
            | Error::ProfileNotFound { .. }
            | Error::UnsupportedArchitecture { .. }
            | Error::Tools { .. }
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Configuration,
            Error::Transport { .. } | Error::Endpoint { .. } => ErrorKind::Transport,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AsyncOperation { .. } => ErrorKind::AsyncOperation,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn transport(operation: &str, err: impl std::fmt::Display) -> Self {
        Error::Transport {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}
