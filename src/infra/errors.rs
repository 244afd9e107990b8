//! Infrastructure error types

use std::time::Duration;
use thiserror::Error;

use crate::core::Retryable;
use crate::infra::InfraOutputs;

/// Failures reported by an infrastructure engine adapter
#[derive(Debug, Error)]
pub enum EngineError {
    /// The module graph or its variables are wrong
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("'{command}' failed: {message}")]
    Execution {
        command: String,
        message: String,
        transient: bool,
    },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid engine output: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for EngineError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Execution { transient, .. } => *transient,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Errors surfaced by the provisioning coordinator
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Plan failed: {0}")]
    PlanFailed(String),

    /// Partial infrastructure may exist; `outputs` holds what was observed
    #[error("Apply failed{}: {message}", timeout_suffix(.timed_out))]
    ApplyFailed {
        message: String,
        timed_out: bool,
        outputs: Box<InfraOutputs>,
    },

    #[error("Failed to render module graph: {0}")]
    Render(String),

    #[error("Infrastructure engine unavailable: {0}")]
    Unavailable(String),

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),
}

fn timeout_suffix(timed_out: &bool) -> &'static str {
    if *timed_out { " (timed out)" } else { "" }
}

impl ProvisionError {
    pub fn partial_outputs(&self) -> Option<&InfraOutputs> {
        match self {
            Self::ApplyFailed { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

impl Retryable for ProvisionError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::ApplyFailed { timed_out: true, .. })
    }
}
