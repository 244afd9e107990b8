use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::templates::FileTree;

/// One immutable entry in a muppet's pipeline history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVersion {
    pub muppet: String,
    /// Starts at 1 and increases by one per recorded version
    pub version: u32,
    pub label: String,
    pub content_hash: String,
    pub files: FileTree,
    pub created_at: DateTime<Utc>,
}

impl PipelineVersion {
    pub fn new<M: Into<String>, L: Into<String>>(
        muppet: M,
        version: u32,
        label: L,
        files: FileTree,
    ) -> Self {
        Self {
            muppet: muppet.into(),
            version,
            label: label.into(),
            content_hash: files.content_hash(),
            files,
            // Millisecond precision, as stored
            created_at: Utc::now().trunc_subsecs(3),
        }
    }

    /// Listing form without file contents
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "version": self.version,
            "label": self.label,
            "content_hash": self.content_hash,
            "files": self.files.paths().collect::<Vec<_>>(),
            "created_at": self.created_at,
        })
    }
}
