//! Terraform adapter
//!
//! Each identity gets its own working directory holding the rendered
//! module graph and the local state. Commands run through the shell
//! executor, so dropping a call kills the terraform process.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{CommandExecutor, CommandResult};
use crate::infra::{EngineError, InfraConfig, InfrastructureEngine, PlanSummary};

/// Failure text that indicates a retryable condition
const TRANSIENT_MARKERS: &[&str] = &[
    "Error acquiring the state lock",
    "RequestLimitExceeded",
    "Throttling",
    "TooManyRequestsException",
    "connection reset",
    "i/o timeout",
    "TLS handshake timeout",
    "503 Service Unavailable",
];

pub struct TerraformEngine {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
}

impl TerraformEngine {
    pub fn new<S: Into<String>>(executor: Arc<dyn CommandExecutor>, binary: S) -> Self {
        Self {
            executor,
            binary: binary.into(),
        }
    }

    async fn run(&self, config: &InfraConfig, args: &str) -> Result<CommandResult, EngineError> {
        let command = format!("{} {}", self.binary, args);
        debug!(identity = %config.identity, run_id = %config.run_id, command = %command, "Running terraform");
        let result = self.executor.execute(&command, &config.work_dir).await?;

        if result.exit_code == 127 {
            return Err(EngineError::Unavailable(format!(
                "'{}' not found: {}",
                self.binary,
                result.summary()
            )));
        }
        Ok(result)
    }

    fn failure(&self, args: &str, result: &CommandResult) -> EngineError {
        let output = format!("{}\n{}", result.stderr, result.stdout);
        EngineError::Execution {
            command: format!("{} {}", self.binary, args),
            message: result.summary(),
            transient: TRANSIENT_MARKERS.iter().any(|m| output.contains(m)),
        }
    }

    /// Write the module graph and initialize providers
    async fn prepare(&self, config: &InfraConfig) -> Result<(), EngineError> {
        config.module_graph.files.write_to(&config.work_dir).await?;

        let args = "init -input=false -no-color";
        let result = self.run(config, args).await?;
        if !result.is_success() {
            return Err(self.failure(args, &result));
        }
        Ok(())
    }
}

#[async_trait]
impl InfrastructureEngine for TerraformEngine {
    async fn plan(&self, config: &InfraConfig) -> Result<PlanSummary, EngineError> {
        self.prepare(config).await?;

        let args = "plan -input=false -no-color -detailed-exitcode";
        let result = self.run(config, args).await?;
        match result.exit_code {
            0 => Ok(PlanSummary::no_changes()),
            2 => {
                let detail = result
                    .stdout
                    .lines()
                    .find(|l| l.starts_with("Plan:"))
                    .unwrap_or("Changes pending")
                    .to_string();
                Ok(PlanSummary::changes(detail))
            }
            _ => match self.failure(args, &result) {
                error @ EngineError::Execution {
                    transient: true, ..
                } => Err(error),
                _ => Err(EngineError::Configuration(result.summary())),
            },
        }
    }

    async fn apply(&self, config: &InfraConfig) -> Result<(), EngineError> {
        self.prepare(config).await?;

        let args = "apply -input=false -no-color -auto-approve";
        let result = self.run(config, args).await?;
        if !result.is_success() {
            return Err(self.failure(args, &result));
        }
        info!(identity = %config.identity, run_id = %config.run_id, "Terraform apply finished");
        Ok(())
    }

    async fn outputs(&self, config: &InfraConfig) -> Result<BTreeMap<String, Value>, EngineError> {
        if !config.work_dir.join(".terraform").exists() {
            return Ok(BTreeMap::new());
        }

        let args = "output -json -no-color";
        let result = self.run(config, args).await?;
        if !result.is_success() {
            return Err(self.failure(args, &result));
        }
        if result.stdout.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&result.stdout).map_err(|e| EngineError::Output(e.to_string()))
    }

    async fn destroy(&self, config: &InfraConfig) -> Result<(), EngineError> {
        self.prepare(config).await?;

        let args = "destroy -input=false -no-color -auto-approve";
        let result = self.run(config, args).await?;
        if !result.is_success() {
            return Err(self.failure(args, &result));
        }
        info!(identity = %config.identity, "Terraform destroy finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Retryable;
    use crate::infra::{InfraIdentity, RenderedModuleGraph};
    use crate::lifecycle::Environment;
    use crate::testing::MockCommandExecutor;
    use crate::templates::FileTree;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> InfraConfig {
        let mut files = FileTree::new();
        files.insert("main.tf", "terraform {}\n");
        InfraConfig {
            identity: InfraIdentity::new("billing-svc", Environment::Development),
            run_id: "run-1".to_string(),
            work_dir: dir.path().join("billing-svc-development"),
            module_graph: RenderedModuleGraph { files },
        }
    }

    fn ok(stdout: &str) -> CommandResult {
        CommandResult {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn exit(code: i32, stderr: &str) -> CommandResult {
        CommandResult {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[tokio::test]
    async fn test_plan_detects_changes_and_writes_modules() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        executor.respond("terraform init", ok("Initialized"));
        executor.respond(
            "terraform plan",
            CommandResult {
                exit_code: 2,
                stdout: "Plan: 12 to add, 0 to change, 0 to destroy.".to_string(),
                stderr: String::new(),
            },
        );

        let engine = TerraformEngine::new(executor.clone(), "terraform");
        let config = config(&dir);
        let summary = engine.plan(&config).await.unwrap();

        assert!(summary.has_changes);
        assert_eq!(summary.detail, "Plan: 12 to add, 0 to change, 0 to destroy.");
        assert!(config.work_dir.join("main.tf").exists());
        assert_eq!(
            executor.commands(),
            vec![
                "terraform init -input=false -no-color",
                "terraform plan -input=false -no-color -detailed-exitcode"
            ]
        );
    }

    #[tokio::test]
    async fn test_plan_without_changes() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        let engine = TerraformEngine::new(executor, "terraform");

        let summary = engine.plan(&config(&dir)).await.unwrap();
        assert!(!summary.has_changes);
    }

    #[tokio::test]
    async fn test_plan_failure_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        executor.respond("terraform plan", exit(1, "Error: Unsupported argument"));
        let engine = TerraformEngine::new(executor, "terraform");

        let err = engine.plan(&config(&dir)).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(ref m) if m == "Error: Unsupported argument"));
    }

    #[tokio::test]
    async fn test_state_lock_is_transient() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        executor.respond("terraform apply", exit(1, "Error acquiring the state lock"));
        let engine = TerraformEngine::new(executor, "terraform");

        let err = engine.apply(&config(&dir)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        executor.respond("tofu init", exit(127, "sh: tofu: not found"));
        let engine = TerraformEngine::new(executor, "tofu");

        let err = engine.apply(&config(&dir)).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_outputs_parse_json() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.work_dir.join(".terraform")).unwrap();

        let executor = Arc::new(MockCommandExecutor::new());
        executor.respond(
            "terraform output",
            ok(r#"{"service_url":{"value":"http://lb","type":"string","sensitive":false}}"#),
        );
        let engine = TerraformEngine::new(executor, "terraform");

        let outputs = engine.outputs(&config).await.unwrap();
        assert_eq!(outputs["service_url"]["value"], "http://lb");
    }

    #[tokio::test]
    async fn test_outputs_before_init_are_empty() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockCommandExecutor::new());
        let engine = TerraformEngine::new(executor.clone(), "terraform");

        assert!(engine.outputs(&config(&dir)).await.unwrap().is_empty());
        assert!(executor.commands().is_empty());
    }
}
