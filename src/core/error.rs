//! Error taxonomy for the lifecycle service.
//!
//! Every component owns a `thiserror` enum; this module wraps them in one
//! crate-level [`Error`] and classifies each failure into an [`ErrorKind`]
//! so callers (and the CLI exit code) can tell validation problems apart
//! from external-system failures, conflicts and unhealthy deployments.
//!
//! # Examples
//!
//! ```
//! use muppets::core::error::{Error, ErrorKind};
//!
//! let error = Error::OperationInProgress("billing-svc".to_string());
//! assert_eq!(error.kind(), ErrorKind::Conflict);
//! assert_eq!(error.exit_code(), 3);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::retry::Retryable;
use crate::infra::ProvisionError;
use crate::lifecycle::{Step, StoreError, ValidationError};
use crate::pipelines::PipelineError;
use crate::repository::RepositoryError;
use crate::templates::InstantiationError;
use crate::verification::VerificationReport;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of failures, stable across components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad muppet spec or parameters; rejected before any external call
    Validation,
    /// Rate limiting, network blips, apply timeouts (after retries ran out)
    ExternalTransient,
    /// Authentication failures, missing prerequisites, plan failures
    ExternalFatal,
    /// Concurrent operation or mismatched idempotent create
    Conflict,
    /// The muppet is provisioned but did not pass its checklist
    VerificationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ExternalTransient => "external_transient",
            Self::ExternalFatal => "external_fatal",
            Self::Conflict => "conflict",
            Self::VerificationFailed => "verification_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template error: {0}")]
    Instantiation(#[from] InstantiationError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Verification failed: {} of {} checks passed", .0.passed_count(), .0.checks.len())]
    VerificationFailed(Box<VerificationReport>),

    #[error("Operation already in progress for muppet '{0}'")]
    OperationInProgress(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Muppet '{0}' not found")]
    MuppetNotFound(String),

    #[error("Operation cancelled during step {step}")]
    Cancelled { step: Step },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Classify this error into the lifecycle taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::MuppetNotFound(_) | Self::Config(_) => {
                ErrorKind::Validation
            }
            Self::Instantiation(e) => {
                if e.is_caller_error() {
                    ErrorKind::Validation
                } else {
                    ErrorKind::ExternalFatal
                }
            }
            Self::Repository(RepositoryError::Conflict(_)) => ErrorKind::Conflict,
            Self::Repository(e) if e.is_transient() => ErrorKind::ExternalTransient,
            Self::Repository(_) => ErrorKind::ExternalFatal,
            Self::Provision(e) if e.is_transient() => ErrorKind::ExternalTransient,
            Self::Provision(_) => ErrorKind::ExternalFatal,
            Self::Pipeline(PipelineError::VersionNotFound { .. }) => ErrorKind::Validation,
            Self::Pipeline(_) => ErrorKind::ExternalFatal,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::OperationInProgress(_) | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Cancelled { .. } => ErrorKind::ExternalTransient,
            Self::Store(_) | Self::Io(_) => ErrorKind::ExternalFatal,
        }
    }

    /// Process exit code for the CLI surface
    ///
    /// `0` success, `1` validation, `2` external failure, `3` operation in
    /// progress for the same muppet.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OperationInProgress(_) => 3,
            _ => match self.kind() {
                ErrorKind::Validation => 1,
                _ => 2,
            },
        }
    }
}
