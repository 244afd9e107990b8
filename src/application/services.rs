//! Process-scoped wiring of the lifecycle service
//!
//! Everything shared (template registry, lock table, store, call gates) is
//! built once here from [`Config`] and injected; nothing is global.

use std::sync::Arc;
use tracing::debug;

use crate::core::config::ConfigError;
use crate::core::{CallGate, CommandExecutor, Config, Result, ShellCommandExecutor};
use crate::infra::{ProvisioningCoordinator, TerraformEngine};
use crate::lifecycle::{LockTable, Orchestrator, OrchestratorSettings, SqliteStore};
use crate::repository::{GitHubProvider, RepositoryManager, RepositorySettings};
use crate::templates::TemplateRegistry;
use crate::verification::{HttpHealthProbe, VerificationEngine};

/// Built-in templates plus the configured template directory
pub async fn load_registry(config: &Config) -> Result<Arc<TemplateRegistry>> {
    let registry = TemplateRegistry::load(config.templates.directory.as_deref()).await?;
    debug!(templates = registry.len(), "Loaded template registry");
    Ok(Arc::new(registry))
}

/// Verification engine running local commands and real HTTP probes
pub fn build_verifier(config: &Config, executor: Arc<dyn CommandExecutor>) -> Result<VerificationEngine> {
    let probe = HttpHealthProbe::new(config.verification.check_timeout())
        .map_err(|e| ConfigError::Invalid(format!("cannot build health probe: {e}")))?;
    Ok(VerificationEngine::new(
        executor,
        Arc::new(probe),
        config.verification.clone(),
    ))
}

/// Orchestrator wired to GitHub, terraform and the SQLite store
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let registry = load_registry(config).await?;
    let store = SqliteStore::open(&config.store.database_path).await?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(ShellCommandExecutor::new());

    let provider = Arc::new(GitHubProvider::new(&config.source_control, None)?);
    let repositories = RepositoryManager::new(
        provider,
        config.retry.clone(),
        CallGate::new(
            "source_control",
            config.concurrency.source_control_max_in_flight,
        ),
        RepositorySettings {
            private: config.source_control.private,
            default_branch: config.source_control.default_branch.clone(),
        },
    );

    let engine = Arc::new(TerraformEngine::new(
        executor.clone(),
        config.infrastructure.binary.clone(),
    ));
    let infrastructure = ProvisioningCoordinator::new(
        engine,
        config.retry.clone(),
        CallGate::new(
            "infrastructure",
            config.concurrency.infrastructure_max_in_flight,
        ),
        config.infrastructure.apply_timeout(),
        config.infrastructure.work_dir.clone(),
        config.infrastructure.region.clone(),
    );

    let verifier = build_verifier(config, executor)?;
    let settings = OrchestratorSettings {
        branch_protection: config.source_control.branch_protection.clone(),
        collaborators: config.source_control.collaborators.clone(),
        auto_teardown_non_production: config.lifecycle.auto_teardown_non_production,
    };

    debug!(
        database = %config.store.database_path.display(),
        lock_mode = ?config.concurrency.lock_mode,
        "Orchestrator ready"
    );
    Ok(Orchestrator::new(
        registry,
        store,
        Arc::new(LockTable::new(config.concurrency.lock_mode)),
        repositories,
        infrastructure,
        verifier,
        settings,
    ))
}
