//! Pipeline version manager
//!
//! Writes are issued by the orchestrator while it holds the muppet's lock,
//! so version numbers are allocated without gaps or duplicates. Recording
//! content identical to the latest version returns that version instead of
//! allocating a new number, which makes retried pushes safe.

use tracing::info;

use crate::lifecycle::SqliteStore;
use crate::pipelines::{PipelineError, PipelineVersion};
use crate::templates::FileTree;

/// Well-known version labels
pub mod labels {
    pub const GENERATED_ON_CREATE: &str = "generated-on-create";
    pub const MANUAL_UPDATE: &str = "manual-update";

    pub fn rollback_to(version: u32) -> String {
        format!("rollback-to-v{version}")
    }
}

#[derive(Clone)]
pub struct PipelineVersionManager {
    store: SqliteStore,
}

impl PipelineVersionManager {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Record `files` as the next version, unless they equal the latest
    pub async fn record_version(
        &self,
        muppet: &str,
        files: FileTree,
        label: &str,
    ) -> Result<PipelineVersion, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::NoPipelineFiles(muppet.to_string()));
        }

        let latest = self.store.latest_pipeline_version(muppet).await?;
        if let Some(latest) = &latest {
            if latest.content_hash == files.content_hash() {
                info!(muppet = %muppet, version = latest.version, "Pipeline content unchanged");
                return Ok(latest.clone());
            }
        }

        self.append(muppet, latest.map_or(1, |v| v.version + 1), label, files)
            .await
    }

    /// All versions of `muppet`, oldest first
    pub async fn list_versions(&self, muppet: &str) -> Result<Vec<PipelineVersion>, PipelineError> {
        Ok(self.store.list_pipeline_versions(muppet).await?)
    }

    pub async fn get_version(
        &self,
        muppet: &str,
        version: u32,
    ) -> Result<PipelineVersion, PipelineError> {
        self.store
            .get_pipeline_version(muppet, version)
            .await?
            .ok_or_else(|| PipelineError::VersionNotFound {
                muppet: muppet.to_string(),
                version,
            })
    }

    pub async fn latest_version(
        &self,
        muppet: &str,
    ) -> Result<Option<PipelineVersion>, PipelineError> {
        Ok(self.store.latest_pipeline_version(muppet).await?)
    }

    /// Append a new version carrying `target`'s content
    ///
    /// History is never rewritten. A repeated rollback to the same target
    /// whose result is still the latest version returns that version.
    pub async fn rollback(
        &self,
        muppet: &str,
        target: u32,
    ) -> Result<PipelineVersion, PipelineError> {
        let source = self.get_version(muppet, target).await?;
        let label = labels::rollback_to(target);

        let latest = self.store.latest_pipeline_version(muppet).await?;
        if let Some(latest) = &latest {
            if latest.label == label && latest.content_hash == source.content_hash {
                info!(muppet = %muppet, version = latest.version, "Rollback already recorded");
                return Ok(latest.clone());
            }
        }

        let next = latest.map_or(1, |v| v.version + 1);
        let version = self.append(muppet, next, &label, source.files).await?;
        info!(muppet = %muppet, target, version = version.version, "Recorded pipeline rollback");
        Ok(version)
    }

    async fn append(
        &self,
        muppet: &str,
        number: u32,
        label: &str,
        files: FileTree,
    ) -> Result<PipelineVersion, PipelineError> {
        let version = PipelineVersion::new(muppet, number, label, files);
        self.store.insert_pipeline_version(&version).await?;
        info!(muppet = %muppet, version = number, label = %label, "Recorded pipeline version");
        Ok(version)
    }
}
