//! Lifecycle states and the steps that move a muppet between them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase a muppet is in
///
/// The happy path is linear from `Pending` to `Active`. `Failed` is reachable
/// from any non-terminal state, `RollingBack` only from `Active`, and
/// `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    RepoCreated,
    CodePushed,
    InfraProvisioning,
    InfraReady,
    Verifying,
    Active,
    RollingBack,
    Failed,
    Deleted,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RepoCreated => "repo_created",
            Self::CodePushed => "code_pushed",
            Self::InfraProvisioning => "infra_provisioning",
            Self::InfraReady => "infra_ready",
            Self::Verifying => "verifying",
            Self::Active => "active",
            Self::RollingBack => "rolling_back",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Form usable as a repository topic (no underscores allowed there)
    pub fn topic(&self) -> String {
        self.as_str().replace('_', "-")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Position on the create path; `None` for states off that path
    fn create_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::RepoCreated => Some(1),
            Self::CodePushed => Some(2),
            Self::InfraProvisioning => Some(3),
            Self::InfraReady => Some(4),
            Self::Verifying => Some(5),
            Self::Active => Some(6),
            _ => None,
        }
    }

    /// True when `self` comes at or after `other` on the create path
    pub fn reached(&self, other: LifecycleState) -> bool {
        match (self.create_rank(), other.create_rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (*self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Failed, Failed) => false,
            (_, Failed) => true,
            (Active, RollingBack) | (RollingBack, Active) => true,
            // Resuming a failed create or pipeline operation
            (Failed, next) => next.create_rank().is_some(),
            (from, to) => match (from.create_rank(), to.create_rank()) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named unit of work inside a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Validate,
    Instantiate,
    CreateRepository,
    PushCode,
    ProvisionInfrastructure,
    Verify,
    UpdatePipelines,
    RollbackPipelines,
    TeardownInfrastructure,
    DeleteRepository,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Instantiate => "instantiate",
            Self::CreateRepository => "create_repository",
            Self::PushCode => "push_code",
            Self::ProvisionInfrastructure => "provision_infrastructure",
            Self::Verify => "verify",
            Self::UpdatePipelines => "update_pipelines",
            Self::RollbackPipelines => "rollback_pipelines",
            Self::TeardownInfrastructure => "teardown_infrastructure",
            Self::DeleteRepository => "delete_repository",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
