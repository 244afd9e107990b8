//! Lifecycle orchestration - sequences components through the state machine
//!
//! Every operation runs under the muppet's lock and persists the record
//! after each transition, so a `status` query always reflects the last
//! completed step. Failures move the record to `Failed` with the error
//! kind, the failing step and the last successful state attached. Nothing
//! created before the failure is removed unless automatic teardown was
//! enabled for non-production environments; `delete` is the explicit
//! compensating action.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::{Error, ErrorKind, Result};
use crate::infra::{InfraIdentity, ProvisioningCoordinator};
use crate::lifecycle::{
    DeletionSummary, ErrorDetail, InfraRef, LifecycleRecord, LifecycleState, LockTable,
    MuppetSpec, OperationContext, RepositoryRef, SqliteStore, Step, validate_name,
};
use crate::pipelines::{PipelineError, PipelineVersion, PipelineVersionManager, labels};
use crate::repository::{BranchProtection, Collaborator, CommitSet, RepositoryManager};
use crate::templates::{FileTree, InstantiationRequest, Template, TemplateRegistry, instantiate};
use crate::verification::VerificationEngine;

/// Policy knobs applied to every muppet
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub branch_protection: BranchProtection,
    /// Granted on every new repository
    pub collaborators: Vec<Collaborator>,
    /// Tear down infrastructure of failed non-production creates
    pub auto_teardown_non_production: bool,
}

/// Orchestrates the lifecycle of every muppet
pub struct Orchestrator {
    registry: Arc<TemplateRegistry>,
    store: SqliteStore,
    locks: Arc<LockTable>,
    repositories: RepositoryManager,
    infrastructure: ProvisioningCoordinator,
    pipelines: PipelineVersionManager,
    verifier: VerificationEngine,
    settings: OrchestratorSettings,
}

/// Outcome of matching a create request against an existing record
enum Existing {
    Complete(LifecycleRecord),
    Resume(LifecycleRecord),
}

fn instantiation_request(record: &LifecycleRecord) -> InstantiationRequest {
    InstantiationRequest {
        muppet_name: record.name.clone(),
        environment: record.environment.to_string(),
        params: record.params.clone(),
        feature_overrides: record.feature_overrides.clone(),
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        store: SqliteStore,
        locks: Arc<LockTable>,
        repositories: RepositoryManager,
        infrastructure: ProvisioningCoordinator,
        verifier: VerificationEngine,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            pipelines: PipelineVersionManager::new(store.clone()),
            store,
            locks,
            repositories,
            infrastructure,
            verifier,
            settings,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Create a muppet, or resume a create that failed partway
    ///
    /// Calling this again for an `Active` muppet with the same template is a
    /// no-op. Validation and instantiation happen before any external call.
    pub async fn create(&self, spec: &MuppetSpec, ctx: OperationContext) -> Result<LifecycleRecord> {
        spec.validate()?;
        let template = self.registry.get(&spec.template)?;
        let request = InstantiationRequest {
            muppet_name: spec.name.clone(),
            environment: spec.environment.to_string(),
            params: spec.params.clone(),
            feature_overrides: spec.feature_overrides.clone(),
        };
        let tree = instantiate(template, &request)?;
        if tree.subtree(&template.pipeline_dir).is_empty() {
            return Err(PipelineError::NoPipelineFiles(spec.name.clone()).into());
        }

        let _guard = self.locks.acquire(&spec.name).await?;

        let (mut record, fresh) = match self.store.get_record(&spec.name).await? {
            None => {
                let record = LifecycleRecord::pending(spec, &template.version);
                self.store.put_record(&record).await?;
                info!(muppet = %spec.name, template = %template.name, "Created lifecycle record");
                (record, true)
            }
            Some(existing) => match self.match_existing(existing, spec, template)? {
                Existing::Complete(record) => {
                    info!(muppet = %spec.name, state = %record.state, "Muppet already created");
                    return Ok(record);
                }
                Existing::Resume(record) => {
                    info!(
                        muppet = %spec.name,
                        from = %record.last_successful_state(),
                        "Resuming create"
                    );
                    (record, false)
                }
            },
        };

        match self.run_create(&mut record, template, &tree, &ctx).await {
            Ok(()) => {
                info!(muppet = %record.name, "Muppet is active");
                Ok(record)
            }
            Err((_, error)) if fresh && error.kind() == ErrorKind::Conflict => {
                // Conflicts leave no trace
                if let Err(e) = self.store.delete_record(&record.name).await {
                    warn!(muppet = %record.name, error = %e, "Failed to discard pending record");
                }
                Err(error)
            }
            Err((step, error)) => Err(self.fail(&mut record, step, error).await),
        }
    }

    fn match_existing(
        &self,
        mut existing: LifecycleRecord,
        spec: &MuppetSpec,
        template: &Template,
    ) -> Result<Existing> {
        if existing.state == LifecycleState::Deleted {
            return Err(Error::conflict(format!(
                "muppet '{}' was deleted; its record is kept for audit",
                spec.name
            )));
        }
        if existing.template.name != spec.template {
            return Err(Error::conflict(format!(
                "muppet '{}' was created from template '{}', requested '{}'",
                spec.name, existing.template.name, spec.template
            )));
        }
        if existing.environment != spec.environment {
            return Err(Error::conflict(format!(
                "muppet '{}' targets {}, requested {}",
                spec.name, existing.environment, spec.environment
            )));
        }

        let created = matches!(
            existing.state,
            LifecycleState::Active | LifecycleState::RollingBack
        ) || existing.last_known_good == Some(LifecycleState::Active);
        if created {
            return Ok(Existing::Complete(existing));
        }

        existing.params = spec.params.clone();
        existing.feature_overrides = spec.feature_overrides.clone();
        existing.template.version = template.version.clone();
        Ok(Existing::Resume(existing))
    }

    async fn run_create(
        &self,
        record: &mut LifecycleRecord,
        template: &Template,
        tree: &FileTree,
        ctx: &OperationContext,
    ) -> std::result::Result<(), (Step, Error)> {
        let resume_from = record.last_successful_state();

        if !resume_from.reached(LifecycleState::RepoCreated) {
            self.create_repository(record, template, ctx)
                .await
                .map_err(|e| (Step::CreateRepository, e))?;
        }
        if !resume_from.reached(LifecycleState::CodePushed) {
            self.push_code(record, template, tree, ctx)
                .await
                .map_err(|e| (Step::PushCode, e))?;
        }
        if !resume_from.reached(LifecycleState::InfraReady) {
            self.provision(record, template, ctx)
                .await
                .map_err(|e| (Step::ProvisionInfrastructure, e))?;
        }
        if !resume_from.reached(LifecycleState::Active) {
            self.verify(record, template, ctx)
                .await
                .map_err(|e| (Step::Verify, e))?;
        }
        Ok(())
    }

    async fn create_repository(
        &self,
        record: &mut LifecycleRecord,
        template: &Template,
        ctx: &OperationContext,
    ) -> Result<()> {
        let description = format!(
            "{} ({} {}, {})",
            record.name, template.name, template.version, record.environment
        );
        let info = ctx
            .run(
                Step::CreateRepository,
                self.repositories
                    .create_repository(&record.name, &template.name, &description),
            )
            .await?;

        for collaborator in &self.settings.collaborators {
            ctx.run(
                Step::CreateRepository,
                self.repositories.set_collaborator(&record.name, collaborator),
            )
            .await?;
        }

        record.repository = Some(RepositoryRef {
            full_name: info.full_name,
            url: info.url,
            default_branch: info.default_branch,
            head_sha: None,
        });
        self.advance(record, LifecycleState::RepoCreated).await
    }

    async fn push_code(
        &self,
        record: &mut LifecycleRecord,
        template: &Template,
        tree: &FileTree,
        ctx: &OperationContext,
    ) -> Result<()> {
        let commit = CommitSet::new(
            self.branch(record),
            format!(
                "Generate {} from {} {}",
                record.name, template.name, template.version
            ),
            tree.clone(),
        );
        let outcome = ctx
            .run(Step::PushCode, self.repositories.push_files(&record.name, &commit))
            .await?;

        ctx.run(
            Step::PushCode,
            self.repositories
                .configure_branch_protection(&record.name, &self.settings.branch_protection),
        )
        .await?;

        // Under the muppet lock, so numbering stays gap-free
        let version = ctx
            .run(
                Step::PushCode,
                self.pipelines.record_version(
                    &record.name,
                    tree.subtree(&template.pipeline_dir),
                    labels::GENERATED_ON_CREATE,
                ),
            )
            .await?;

        if let Some(repository) = record.repository.as_mut() {
            repository.head_sha = Some(outcome.sha().to_string());
        }
        record.active_pipeline_version = Some(version.version);
        self.advance(record, LifecycleState::CodePushed).await
    }

    async fn provision(
        &self,
        record: &mut LifecycleRecord,
        template: &Template,
        ctx: &OperationContext,
    ) -> Result<()> {
        self.advance(record, LifecycleState::InfraProvisioning).await?;

        let identity = InfraIdentity::new(&record.name, record.environment);
        let repository = record
            .repository
            .as_ref()
            .map(|r| r.full_name.clone())
            .unwrap_or_else(|| record.name.clone());
        let graph = self.infrastructure.render(
            &identity,
            &repository,
            template.container_port(&record.params),
            template.kind.health_check_path(),
        )?;

        let infra = record.infrastructure.get_or_insert_with(|| InfraRef {
            identity: identity.clone(),
            run_ids: Vec::new(),
            module_hash: String::new(),
            outputs: None,
        });
        infra.module_hash = graph.content_hash();
        self.store.put_record(record).await?;

        let result = ctx
            .run(
                Step::ProvisionInfrastructure,
                self.infrastructure.provision(&identity, &graph),
            )
            .await;

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(Error::Provision(e)) => {
                if let (Some(partial), Some(infra)) =
                    (e.partial_outputs(), record.infrastructure.as_mut())
                {
                    infra.run_ids.push(partial.run_id.clone());
                    infra.outputs = Some(partial.clone());
                }
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        if let Some(infra) = record.infrastructure.as_mut() {
            infra.run_ids.push(outputs.run_id.clone());
            infra.outputs = Some(outputs);
        }
        self.advance(record, LifecycleState::InfraReady).await
    }

    async fn verify(
        &self,
        record: &mut LifecycleRecord,
        template: &Template,
        ctx: &OperationContext,
    ) -> Result<()> {
        self.advance(record, LifecycleState::Verifying).await?;

        let outputs = record
            .infrastructure
            .as_ref()
            .and_then(|i| i.outputs.clone())
            .unwrap_or_default();
        let report = ctx
            .run(Step::Verify, async {
                Ok::<_, Error>(
                    self.verifier
                        .verify_deployment(&record.name, &outputs, template.kind.health_check_path())
                        .await,
                )
            })
            .await?;

        record.verification = Some(report.clone());
        if !report.passed {
            return Err(Error::VerificationFailed(Box::new(report)));
        }
        self.advance(record, LifecycleState::Active).await
    }

    /// Re-render the workflow files of an active muppet and push them
    pub async fn update_pipelines(&self, name: &str, ctx: OperationContext) -> Result<LifecycleRecord> {
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await?;
        let mut record = self.load(name).await?;
        self.ensure_pipeline_operations(&record)?;

        let template = self.registry.get(&record.template.name)?;
        if template.version != record.template.version {
            warn!(
                muppet = %name,
                recorded = %record.template.version,
                available = %template.version,
                "Template version changed since create; rendering the available version"
            );
        }
        let tree = instantiate(template, &instantiation_request(&record))?;
        let files = tree.subtree(&template.pipeline_dir);
        let pipeline_dir = template.pipeline_dir.clone();

        let result = async {
            let version = ctx
                .run(
                    Step::UpdatePipelines,
                    self.pipelines
                        .record_version(name, files, labels::MANUAL_UPDATE),
                )
                .await?;
            self.push_pipelines(&mut record, &pipeline_dir, &version, Step::UpdatePipelines, &ctx)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.recover(&mut record).await?;
                Ok(record)
            }
            Err(error) => {
                record.last_known_good = Some(LifecycleState::Active);
                Err(self.fail(&mut record, Step::UpdatePipelines, error).await)
            }
        }
    }

    /// Push the content of pipeline version `target` as a new version
    pub async fn rollback_pipelines(
        &self,
        name: &str,
        target: u32,
        ctx: OperationContext,
    ) -> Result<LifecycleRecord> {
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await?;
        let mut record = self.load(name).await?;
        self.ensure_pipeline_operations(&record)?;

        // An unknown version is rejected before the state changes
        self.pipelines.get_version(name, target).await?;
        let pipeline_dir = self.pipeline_dir(&record);

        if record.state == LifecycleState::Active {
            self.advance(&mut record, LifecycleState::RollingBack).await?;
        }

        let result = async {
            let version = ctx
                .run(
                    Step::RollbackPipelines,
                    self.pipelines.rollback(name, target),
                )
                .await?;
            self.push_pipelines(&mut record, &pipeline_dir, &version, Step::RollbackPipelines, &ctx)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.recover(&mut record).await?;
                info!(muppet = %name, target, version = ?record.active_pipeline_version, "Pipelines rolled back");
                Ok(record)
            }
            Err(error) => {
                record.last_known_good = Some(LifecycleState::Active);
                Err(self.fail(&mut record, Step::RollbackPipelines, error).await)
            }
        }
    }

    async fn push_pipelines(
        &self,
        record: &mut LifecycleRecord,
        pipeline_dir: &str,
        version: &PipelineVersion,
        step: Step,
        ctx: &OperationContext,
    ) -> Result<()> {
        let commit = CommitSet::new(
            self.branch(record),
            format!("Pipelines v{} ({})", version.version, version.label),
            version.files.clone(),
        )
        .replacing(pipeline_dir);
        let outcome = ctx
            .run(step, self.repositories.push_files(&record.name, &commit))
            .await?;

        if let Some(repository) = record.repository.as_mut() {
            repository.head_sha = Some(outcome.sha().to_string());
        }
        record.active_pipeline_version = Some(version.version);
        Ok(())
    }

    /// Back to `Active` after a successful pipeline operation
    async fn recover(&self, record: &mut LifecycleRecord) -> Result<()> {
        record.last_known_good = None;
        if record.state == LifecycleState::Active {
            record.updated_at = Utc::now();
            self.store.put_record(record).await?;
            Ok(())
        } else {
            self.advance(record, LifecycleState::Active).await
        }
    }

    fn ensure_pipeline_operations(&self, record: &LifecycleRecord) -> Result<()> {
        if record.accepts_pipeline_operations() {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "muppet '{}' is {}; pipeline operations need an active muppet",
                record.name, record.state
            )))
        }
    }

    /// Tear down infrastructure, delete the repository, keep the record
    ///
    /// Teardown is best-effort: its failure is recorded in the deletion
    /// summary and does not stop the repository deletion. A failed
    /// repository deletion leaves the muppet `Failed` so delete can be
    /// retried.
    pub async fn delete(&self, name: &str, ctx: OperationContext) -> Result<LifecycleRecord> {
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await?;
        let mut record = self.load(name).await?;
        if record.state == LifecycleState::Deleted {
            info!(muppet = %name, "Muppet already deleted");
            return Ok(record);
        }

        let mut summary = DeletionSummary::default();
        if record.infrastructure_touched() {
            match self.teardown(&record, &ctx).await {
                Ok(()) => summary.infrastructure_torn_down = true,
                Err(e) => {
                    warn!(muppet = %name, error = %e, "Infrastructure teardown failed; continuing with repository deletion");
                    summary.teardown_error = Some(e.to_string());
                }
            }
        }

        match ctx
            .run(Step::DeleteRepository, self.repositories.delete_repository(name))
            .await
        {
            Ok(true) => summary.repository_deleted = true,
            Ok(false) => summary.repository_absent = true,
            Err(error) => {
                summary.repository_error = Some(error.to_string());
                record.deletion = Some(summary);
                return Err(self.fail(&mut record, Step::DeleteRepository, error).await);
            }
        }

        record.deletion = Some(summary);
        self.advance(&mut record, LifecycleState::Deleted).await?;
        info!(muppet = %name, "Muppet deleted");
        Ok(record)
    }

    async fn teardown(&self, record: &LifecycleRecord, ctx: &OperationContext) -> Result<()> {
        let template = self.registry.get(&record.template.name)?;
        let identity = record
            .infrastructure
            .as_ref()
            .map(|i| i.identity.clone())
            .unwrap_or_else(|| InfraIdentity::new(&record.name, record.environment));
        let repository = record
            .repository
            .as_ref()
            .map(|r| r.full_name.clone())
            .unwrap_or_else(|| record.name.clone());
        let graph = self.infrastructure.render(
            &identity,
            &repository,
            template.container_port(&record.params),
            template.kind.health_check_path(),
        )?;

        ctx.run(
            Step::TeardownInfrastructure,
            self.infrastructure.teardown(&identity, &graph),
        )
        .await
    }

    /// Current lifecycle record
    pub async fn status(&self, name: &str) -> Result<LifecycleRecord> {
        validate_name(name)?;
        self.load(name).await
    }

    pub async fn list(&self) -> Result<Vec<LifecycleRecord>> {
        Ok(self.store.list_records().await?)
    }

    pub async fn list_pipeline_versions(&self, name: &str) -> Result<Vec<PipelineVersion>> {
        validate_name(name)?;
        self.load(name).await?;
        Ok(self.pipelines.list_versions(name).await?)
    }

    async fn load(&self, name: &str) -> Result<LifecycleRecord> {
        self.store
            .get_record(name)
            .await?
            .ok_or_else(|| Error::MuppetNotFound(name.to_string()))
    }

    fn branch(&self, record: &LifecycleRecord) -> String {
        record
            .repository
            .as_ref()
            .map(|r| r.default_branch.clone())
            .unwrap_or_else(|| self.repositories.default_branch().to_string())
    }

    fn pipeline_dir(&self, record: &LifecycleRecord) -> String {
        self.registry
            .get(&record.template.name)
            .map(|t| t.pipeline_dir.clone())
            .unwrap_or_else(|_| ".github/workflows".to_string())
    }

    /// Stamp a transition, persist it and mirror it to the repository
    async fn advance(&self, record: &mut LifecycleRecord, next: LifecycleState) -> Result<()> {
        let from = record.state;
        if from == next {
            // Resuming a step that was interrupted mid-flight
            record.updated_at = Utc::now();
            self.store.put_record(record).await?;
            return Ok(());
        }
        if !from.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "muppet '{}' cannot move from {from} to {next}",
                record.name
            )));
        }

        record.enter(next);
        self.store.put_record(record).await?;
        info!(muppet = %record.name, from = %from, to = %next, "Lifecycle transition");
        self.mirror_status(record).await;
        Ok(())
    }

    /// Record `error` on the muppet and move it to `Failed`
    async fn fail(&self, record: &mut LifecycleRecord, step: Step, error: Error) -> Error {
        let last_successful_state = record.last_successful_state();
        let failed_in = match record.state {
            LifecycleState::Failed => record
                .last_error
                .as_ref()
                .map(|e| e.failed_in)
                .unwrap_or(last_successful_state),
            state => state,
        };
        error!(
            muppet = %record.name,
            step = %step,
            kind = %error.kind(),
            state = %failed_in,
            error = %error,
            "Lifecycle step failed"
        );

        let compensation = if self.should_compensate(record, step, &error) {
            Some(self.compensate(record).await)
        } else {
            None
        };

        record.last_error = Some(ErrorDetail {
            kind: error.kind(),
            step,
            failed_in,
            message: error.to_string(),
            last_successful_state,
            compensation,
            at: Utc::now(),
        });
        if record.state == LifecycleState::Failed {
            record.updated_at = Utc::now();
        } else {
            record.enter(LifecycleState::Failed);
        }

        if let Err(e) = self.store.put_record(record).await {
            error!(muppet = %record.name, error = %e, "Failed to persist failure");
        }
        self.mirror_status(record).await;
        error
    }

    fn should_compensate(&self, record: &LifecycleRecord, step: Step, error: &Error) -> bool {
        self.settings.auto_teardown_non_production
            && !record.environment.is_production()
            && matches!(step, Step::ProvisionInfrastructure | Step::Verify)
            && !matches!(error, Error::Cancelled { .. })
            && record.infrastructure_touched()
    }

    async fn compensate(&self, record: &mut LifecycleRecord) -> String {
        info!(muppet = %record.name, environment = %record.environment, "Tearing down infrastructure of failed create");
        match self.teardown(record, &OperationContext::unbounded()).await {
            Ok(()) => {
                if let Some(infra) = record.infrastructure.as_mut() {
                    infra.outputs = None;
                }
                "infrastructure torn down".to_string()
            }
            Err(e) => {
                warn!(muppet = %record.name, error = %e, "Automatic teardown failed");
                format!("teardown failed: {e}")
            }
        }
    }

    /// Best-effort status topic on the repository
    async fn mirror_status(&self, record: &LifecycleRecord) {
        if record.repository.is_none() || record.state == LifecycleState::Deleted {
            return;
        }
        if let Err(e) = self
            .repositories
            .set_status_tag(&record.name, &record.state.topic())
            .await
        {
            warn!(muppet = %record.name, state = %record.state, error = %e, "Failed to mirror status to repository");
        }
    }
}
