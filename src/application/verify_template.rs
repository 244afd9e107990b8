//! Use case for verifying a template outside any muppet lifecycle

use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

use crate::application::VerifyTemplateRequest;
use crate::core::Result;
use crate::templates::{TemplateRegistry, instantiate};
use crate::verification::{TemplateChecks, VerificationEngine, VerificationReport};

/// Materializes a template and runs the template checklist on it
pub struct VerifyTemplateUseCase {
    registry: Arc<TemplateRegistry>,
    verifier: VerificationEngine,
}

impl VerifyTemplateUseCase {
    pub fn new(registry: Arc<TemplateRegistry>, verifier: VerificationEngine) -> Self {
        Self { registry, verifier }
    }

    pub async fn execute(&self, request: &VerifyTemplateRequest) -> Result<VerificationReport> {
        let template = self.registry.get(&request.template)?;
        let instantiation = request.instantiation_request()?;
        let tree = instantiate(template, &instantiation)?;

        // The scratch directory is removed when `_scratch` drops
        let (_scratch, work_dir) = match &request.output_dir {
            Some(dir) => (None, dir.clone()),
            None => {
                let scratch = TempDir::new()?;
                let path = scratch.path().to_path_buf();
                (Some(scratch), path)
            }
        };
        info!(
            template = %template.name,
            dir = %work_dir.display(),
            files = tree.len(),
            "Materialized template for verification"
        );

        let checks = TemplateChecks {
            skip_build: request.skip_build,
            skip_container: request.skip_container,
        };
        Ok(self
            .verifier
            .verify_template(template, &instantiation, &tree, &work_dir, checks)
            .await)
    }
}
