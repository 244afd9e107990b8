//! The durable per-muppet lifecycle record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::ErrorKind;
use crate::infra::{InfraIdentity, InfraOutputs};
use crate::lifecycle::{Environment, LifecycleState, MuppetSpec, Step};
use crate::verification::VerificationReport;

/// Template name and version a muppet was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub version: String,
}

/// Repository created for the muppet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub full_name: String,
    pub url: String,
    pub default_branch: String,
    /// Commit holding the generated code
    pub head_sha: Option<String>,
}

/// Infrastructure provisioned for the muppet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraRef {
    pub identity: InfraIdentity,
    /// Every provisioning run, oldest first
    pub run_ids: Vec<String>,
    pub module_hash: String,
    /// Last snapshot of outputs, possibly partial
    pub outputs: Option<InfraOutputs>,
}

/// When a state was entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: LifecycleState,
    pub at: DateTime<Utc>,
}

/// Why the muppet is `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub step: Step,
    /// State the muppet was in when the step failed
    pub failed_in: LifecycleState,
    pub message: String,
    /// Last state a completed step reached
    pub last_successful_state: LifecycleState,
    /// Outcome of automatic teardown, when it ran
    #[serde(default)]
    pub compensation: Option<String>,
    pub at: DateTime<Utc>,
}

/// What the delete operation managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub infrastructure_torn_down: bool,
    pub teardown_error: Option<String>,
    pub repository_deleted: bool,
    /// The repository did not exist when delete ran
    pub repository_absent: bool,
    pub repository_error: Option<String>,
}

/// Lifecycle record, owned and written only by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub name: String,
    pub state: LifecycleState,
    pub template: TemplateRef,
    pub environment: Environment,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub feature_overrides: BTreeMap<String, bool>,
    pub repository: Option<RepositoryRef>,
    pub infrastructure: Option<InfraRef>,
    pub active_pipeline_version: Option<u32>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub last_error: Option<ErrorDetail>,
    /// Set when a pipeline operation fails on an otherwise active muppet
    pub last_known_good: Option<LifecycleState>,
    pub verification: Option<VerificationReport>,
    pub deletion: Option<DeletionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleRecord {
    /// A fresh record in `Pending`
    pub fn pending(spec: &MuppetSpec, template_version: &str) -> Self {
        let now = Utc::now();
        Self {
            name: spec.name.clone(),
            state: LifecycleState::Pending,
            template: TemplateRef {
                name: spec.template.clone(),
                version: template_version.to_string(),
            },
            environment: spec.environment,
            params: spec.params.clone(),
            feature_overrides: spec.feature_overrides.clone(),
            repository: None,
            infrastructure: None,
            active_pipeline_version: None,
            transitions: vec![Transition {
                state: LifecycleState::Pending,
                at: now,
            }],
            last_error: None,
            last_known_good: None,
            verification: None,
            deletion: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` and stamp the transition
    pub fn enter(&mut self, next: LifecycleState) {
        let now = Utc::now();
        self.state = next;
        self.transitions.push(Transition {
            state: next,
            at: now,
        });
        self.updated_at = now;
        if next != LifecycleState::Failed {
            self.last_error = None;
        }
    }

    /// Furthest state on the create path reached by a completed step
    pub fn last_successful_state(&self) -> LifecycleState {
        match self.state {
            LifecycleState::Failed => self
                .last_error
                .as_ref()
                .map(|e| e.last_successful_state)
                .unwrap_or(LifecycleState::Pending),
            LifecycleState::InfraProvisioning => LifecycleState::CodePushed,
            LifecycleState::Verifying => LifecycleState::InfraReady,
            LifecycleState::RollingBack => LifecycleState::Active,
            state => state,
        }
    }

    /// Whether provisioning was ever started, so teardown may be needed
    pub fn infrastructure_touched(&self) -> bool {
        self.infrastructure.is_some()
            || self
                .transitions
                .iter()
                .any(|t| t.state == LifecycleState::InfraProvisioning)
    }

    pub fn service_url(&self) -> Option<&str> {
        self.infrastructure
            .as_ref()
            .and_then(|i| i.outputs.as_ref())
            .and_then(|o| o.service_url.as_deref())
    }

    /// Failure detail recorded at or after `since`, if the muppet is Failed
    pub fn failure_since(&self, since: DateTime<Utc>) -> Option<&ErrorDetail> {
        if self.state != LifecycleState::Failed {
            return None;
        }
        self.last_error.as_ref().filter(|detail| detail.at >= since)
    }

    /// True when pipeline operations may run
    ///
    /// `RollingBack` is accepted so a rollback interrupted by a crash can be
    /// issued again.
    pub fn accepts_pipeline_operations(&self) -> bool {
        match self.state {
            LifecycleState::Active | LifecycleState::RollingBack => true,
            LifecycleState::Failed => self.last_known_good == Some(LifecycleState::Active),
            _ => false,
        }
    }
}
