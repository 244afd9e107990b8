//! Provisioning runs against the infrastructure engine
//!
//! A run plans first; when the plan shows no changes the configuration is
//! already applied and only its outputs are read. Applies are bounded by a
//! timeout, and a timed-out or failed apply reports whatever outputs the
//! engine already knows as a partial snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{CallGate, RetryPolicy};
use crate::infra::modules::{ModuleParameters, render_module_graph};
use crate::infra::{
    EngineError, InfraConfig, InfraIdentity, InfraOutputs, InfrastructureEngine, ProvisionError,
    RenderedModuleGraph,
};

pub struct ProvisioningCoordinator {
    engine: Arc<dyn InfrastructureEngine>,
    retry: RetryPolicy,
    gate: CallGate,
    apply_timeout: Duration,
    work_root: PathBuf,
    region: String,
}

impl ProvisioningCoordinator {
    pub fn new(
        engine: Arc<dyn InfrastructureEngine>,
        retry: RetryPolicy,
        gate: CallGate,
        apply_timeout: Duration,
        work_root: PathBuf,
        region: String,
    ) -> Self {
        Self {
            engine,
            retry,
            gate,
            apply_timeout,
            work_root,
            region,
        }
    }

    /// Render the module graph for a muppet environment
    pub fn render(
        &self,
        identity: &InfraIdentity,
        repository: &str,
        container_port: u16,
        health_path: &str,
    ) -> Result<RenderedModuleGraph, ProvisionError> {
        render_module_graph(&ModuleParameters {
            muppet_name: identity.muppet.clone(),
            environment: identity.environment,
            region: self.region.clone(),
            repository: repository.to_string(),
            container_port,
            health_path: health_path.to_string(),
        })
    }

    fn config(&self, identity: &InfraIdentity, graph: &RenderedModuleGraph) -> InfraConfig {
        InfraConfig {
            identity: identity.clone(),
            run_id: Uuid::new_v4().to_string(),
            work_dir: self.work_root.join(identity.to_string()),
            module_graph: graph.clone(),
        }
    }

    /// Plan and apply `graph` for `identity`
    pub async fn provision(
        &self,
        identity: &InfraIdentity,
        graph: &RenderedModuleGraph,
    ) -> Result<InfraOutputs, ProvisionError> {
        let config = self.config(identity, graph);
        info!(identity = %identity, run_id = %config.run_id, "Starting provisioning run");

        let plan = self
            .retry
            .run("infra_plan", || self.gate.run(self.engine.plan(&config)))
            .await
            .map_err(|e| match e {
                EngineError::Unavailable(m) => ProvisionError::Unavailable(m),
                other => ProvisionError::PlanFailed(other.to_string()),
            })?;

        if plan.has_changes {
            info!(identity = %identity, plan = %plan.detail, "Applying changes");
            let applied = self
                .retry
                .run("infra_apply", || async {
                    match tokio::time::timeout(
                        self.apply_timeout,
                        self.gate.run(self.engine.apply(&config)),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout(self.apply_timeout)),
                    }
                })
                .await;

            if let Err(error) = applied {
                let timed_out = matches!(error, EngineError::Timeout(_));
                warn!(identity = %identity, run_id = %config.run_id, error = %error, "Apply failed");
                return Err(ProvisionError::ApplyFailed {
                    message: error.to_string(),
                    timed_out,
                    outputs: Box::new(self.partial_outputs(&config).await),
                });
            }
        } else {
            info!(identity = %identity, "Plan shows no changes; configuration already applied");
        }

        let raw = self
            .retry
            .run("infra_outputs", || self.gate.run(self.engine.outputs(&config)))
            .await
            .map_err(|e| ProvisionError::ApplyFailed {
                message: format!("could not read outputs: {e}"),
                timed_out: false,
                outputs: Box::new(InfraOutputs::partial(&config.run_id)),
            })?;

        let outputs = InfraOutputs::from_raw(&config.run_id, raw);
        let missing = outputs.missing();
        if !missing.is_empty() {
            let mut partial = outputs;
            partial.partial = true;
            return Err(ProvisionError::ApplyFailed {
                message: format!("missing outputs: {}", missing.join(", ")),
                timed_out: false,
                outputs: Box::new(partial),
            });
        }

        info!(
            identity = %identity,
            run_id = %config.run_id,
            service_url = outputs.service_url.as_deref().unwrap_or_default(),
            "Provisioning run complete"
        );
        Ok(outputs)
    }

    /// Destroy everything provisioned for `identity`
    pub async fn teardown(
        &self,
        identity: &InfraIdentity,
        graph: &RenderedModuleGraph,
    ) -> Result<(), ProvisionError> {
        let config = self.config(identity, graph);
        info!(identity = %identity, run_id = %config.run_id, "Tearing down infrastructure");

        self.retry
            .run("infra_destroy", || self.gate.run(self.engine.destroy(&config)))
            .await
            .map_err(|e| ProvisionError::TeardownFailed(e.to_string()))
    }

    async fn partial_outputs(&self, config: &InfraConfig) -> InfraOutputs {
        match self.gate.run(self.engine.outputs(config)).await {
            Ok(raw) => {
                let mut outputs = InfraOutputs::from_raw(&config.run_id, raw);
                outputs.partial = true;
                outputs
            }
            Err(error) => {
                warn!(run_id = %config.run_id, error = %error, "Could not read partial outputs");
                InfraOutputs::partial(&config.run_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Retryable;
    use crate::lifecycle::Environment;
    use crate::testing::MockEngine;

    fn coordinator(engine: Arc<MockEngine>, apply_timeout: Duration) -> ProvisioningCoordinator {
        ProvisioningCoordinator::new(
            engine,
            RetryPolicy::immediate(3),
            CallGate::new("infrastructure", 1),
            apply_timeout,
            std::env::temp_dir().join("muppets-coordinator-tests"),
            "us-east-1".to_string(),
        )
    }

    fn identity() -> InfraIdentity {
        InfraIdentity::new("billing-svc", Environment::Development)
    }

    fn graph(coordinator: &ProvisioningCoordinator) -> RenderedModuleGraph {
        coordinator
            .render(&identity(), "acme/billing-svc", 8080, "/health")
            .unwrap()
    }

    #[tokio::test]
    async fn test_provision_then_reprovision_is_noop() {
        let engine = Arc::new(MockEngine::new());
        let coordinator = coordinator(engine.clone(), Duration::from_secs(5));
        let graph = graph(&coordinator);

        let first = coordinator.provision(&identity(), &graph).await.unwrap();
        let second = coordinator.provision(&identity(), &graph).await.unwrap();

        assert!(first.service_url.is_some());
        assert!(!first.partial);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.service_url, second.service_url);
        assert_eq!(engine.calls("apply"), 1);
        assert_eq!(engine.calls("plan"), 2);
    }

    #[tokio::test]
    async fn test_plan_failure_is_not_retried() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next("plan", EngineError::Configuration("bad variable".to_string()));
        let coordinator = coordinator(engine.clone(), Duration::from_secs(5));

        let err = coordinator
            .provision(&identity(), &graph(&coordinator))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PlanFailed(_)));
        assert_eq!(engine.calls("plan"), 1);
        assert_eq!(engine.calls("apply"), 0);
    }

    #[tokio::test]
    async fn test_transient_apply_failure_is_retried() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next(
            "apply",
            EngineError::Execution {
                command: "apply".to_string(),
                message: "Throttling".to_string(),
                transient: true,
            },
        );
        let coordinator = coordinator(engine.clone(), Duration::from_secs(5));

        let outputs = coordinator
            .provision(&identity(), &graph(&coordinator))
            .await
            .unwrap();
        assert!(outputs.is_complete());
        assert_eq!(engine.calls("apply"), 2);
    }

    #[tokio::test]
    async fn test_apply_timeout_reports_partial_outputs() {
        let engine = Arc::new(MockEngine::new());
        engine.set_apply_delay(Duration::from_millis(200));
        let coordinator = coordinator(engine.clone(), Duration::from_millis(20));

        let err = coordinator
            .provision(&identity(), &graph(&coordinator))
            .await
            .unwrap_err();
        match &err {
            ProvisionError::ApplyFailed {
                timed_out, outputs, ..
            } => {
                assert!(*timed_out);
                assert!(outputs.partial);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
        assert_eq!(engine.calls("apply"), 3);
    }

    #[tokio::test]
    async fn test_fatal_apply_failure() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next(
            "apply",
            EngineError::Execution {
                command: "apply".to_string(),
                message: "AccessDenied".to_string(),
                transient: false,
            },
        );
        let coordinator = coordinator(engine.clone(), Duration::from_secs(5));

        let err = coordinator
            .provision(&identity(), &graph(&coordinator))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ApplyFailed { timed_out: false, .. }));
        assert!(!err.is_transient());
        assert_eq!(engine.calls("apply"), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next("destroy", EngineError::Configuration("dependency violation".to_string()));
        let coordinator = coordinator(engine.clone(), Duration::from_secs(5));

        let err = coordinator
            .teardown(&identity(), &graph(&coordinator))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::TeardownFailed(_)));
    }
}
