//! Error types for the Velero backup manager

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Backup manager error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (the cluster object gateway failed)
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Target resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Request is malformed or a required result field is missing
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An asynchronous request did not reach a terminal phase in time
    #[error("{kind} '{name}' was not processed within {waited:?}")]
    TimedOut {
        kind: String,
        name: String,
        waited: Duration,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not-found error for a resource kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Short outcome label used for metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::BadRequest(_) => "bad_request",
            Error::TimedOut { .. } => "timed_out",
            _ => "failure",
        }
    }
}
