use thiserror::Error;

use crate::lifecycle::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline version {version} not found for muppet '{muppet}'")]
    VersionNotFound { muppet: String, version: u32 },

    #[error("No pipeline files to record for muppet '{0}'")]
    NoPipelineFiles(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
