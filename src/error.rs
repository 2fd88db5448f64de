//! Typed failures returned by the registry, workflow, and corpus collaborators.
//!
//! Command-layer code wraps these in `anyhow` with context; the HTTP layer
//! maps each kind onto a status code via [`GatewayError::code`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{id} is already {status}; only pending corrections can transition")]
    InvalidState { id: String, status: String },

    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GatewayError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GatewayError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code used in error bodies and batch reports.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::InvalidState { .. } => "invalid_state",
            GatewayError::ExternalService(_) => "external_service_failure",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Io { .. } => "io_failure",
            GatewayError::Database(_) => "internal",
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
