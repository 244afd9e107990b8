//! Error types for template loading and instantiation

use thiserror::Error;

/// Errors raised while resolving or instantiating a template
#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template '{template}' requires parameter '{parameter}'")]
    MissingParameter { template: String, parameter: String },

    #[error("Invalid value for parameter '{parameter}': {reason}")]
    InvalidParameterValue { parameter: String, reason: String },

    #[error("Invalid template manifest: {0}")]
    InvalidManifest(String),

    #[error("Failed to render {path}: {message}")]
    Render { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstantiationError {
    pub fn invalid_value<P: Into<String>, R: Into<String>>(parameter: P, reason: R) -> Self {
        Self::InvalidParameterValue {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// True when the caller supplied a bad template reference or parameters
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound(_)
                | Self::MissingParameter { .. }
                | Self::InvalidParameterValue { .. }
        )
    }
}
