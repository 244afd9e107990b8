//! Source-control error types

use std::time::Duration;
use thiserror::Error;

use crate::core::Retryable;

/// Errors surfaced by the source-control provider and the repository manager
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by source-control provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Repository already exists: {0}")]
    AlreadyExists(String),

    /// Existing repository was created from another template
    #[error("Repository conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl RepositoryError {
    pub fn api<M: Into<String>>(status: u16, message: M) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Retryable for RepositoryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
