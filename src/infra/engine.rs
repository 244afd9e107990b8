//! Infrastructure engine contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::infra::{EngineError, RenderedModuleGraph};
use crate::lifecycle::Environment;

/// Identity of a provisioned configuration: one per muppet and environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InfraIdentity {
    pub muppet: String,
    pub environment: Environment,
}

impl InfraIdentity {
    pub fn new<S: Into<String>>(muppet: S, environment: Environment) -> Self {
        Self {
            muppet: muppet.into(),
            environment,
        }
    }
}

impl fmt::Display for InfraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.muppet, self.environment)
    }
}

/// Everything an engine needs for one provisioning run
#[derive(Debug, Clone)]
pub struct InfraConfig {
    pub identity: InfraIdentity,
    pub run_id: String,
    pub work_dir: PathBuf,
    pub module_graph: RenderedModuleGraph,
}

/// Result of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub has_changes: bool,
    pub detail: String,
}

impl PlanSummary {
    pub fn no_changes() -> Self {
        Self {
            has_changes: false,
            detail: "No changes".to_string(),
        }
    }

    pub fn changes<S: Into<String>>(detail: S) -> Self {
        Self {
            has_changes: true,
            detail: detail.into(),
        }
    }
}

/// Operations consumed from the infrastructure-as-code engine
///
/// Re-applying an applied configuration must plan no changes.
#[async_trait]
pub trait InfrastructureEngine: Send + Sync {
    async fn plan(&self, config: &InfraConfig) -> Result<PlanSummary, EngineError>;

    async fn apply(&self, config: &InfraConfig) -> Result<(), EngineError>;

    /// Current outputs of the configuration; empty when nothing is applied
    async fn outputs(&self, config: &InfraConfig) -> Result<BTreeMap<String, Value>, EngineError>;

    async fn destroy(&self, config: &InfraConfig) -> Result<(), EngineError>;
}
