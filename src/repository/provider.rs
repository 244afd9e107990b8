//! Source-control provider contract
//!
//! The provider is always the callee. Implementations map the provider's
//! API onto these operations and onto [`RepositoryError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::repository::RepositoryError;
use crate::templates::FileTree;

/// Topic prefix recording the template a repository was created from
pub const TEMPLATE_TOPIC_PREFIX: &str = "template-";

/// Topic prefix mirroring the lifecycle state
pub const STATUS_TOPIC_PREFIX: &str = "status-";

/// A repository as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub clone_url: String,
    pub default_branch: String,
    pub private: bool,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl RepositoryInfo {
    /// Template name recorded on the repository, if any
    pub fn template_tag(&self) -> Option<&str> {
        self.topics
            .iter()
            .find_map(|t| t.strip_prefix(TEMPLATE_TOPIC_PREFIX))
    }

    /// Mirrored lifecycle status, if any
    pub fn status_tag(&self) -> Option<&str> {
        self.topics
            .iter()
            .find_map(|t| t.strip_prefix(STATUS_TOPIC_PREFIX))
    }
}

/// Parameters for a new repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub topics: Vec<String>,
}

/// Files to push as one commit
#[derive(Debug, Clone)]
pub struct CommitSet {
    pub branch: String,
    pub message: String,
    pub files: FileTree,
    /// Files under this directory that are not in `files` are removed
    pub replace_dir: Option<String>,
}

impl CommitSet {
    pub fn new<B: Into<String>, M: Into<String>>(branch: B, message: M, files: FileTree) -> Self {
        Self {
            branch: branch.into(),
            message: message.into(),
            files,
            replace_dir: None,
        }
    }

    pub fn replacing<D: Into<String>>(mut self, dir: D) -> Self {
        self.replace_dir = Some(dir.into());
        self
    }
}

/// Result of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { sha: String },
    /// The branch already held exactly this content
    Unchanged { sha: String },
}

impl CommitOutcome {
    pub fn sha(&self) -> &str {
        match self {
            Self::Committed { sha } | Self::Unchanged { sha } => sha,
        }
    }
}

/// Branch protection rules applied to the default branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProtection {
    pub required_approvals: u32,
    pub dismiss_stale_reviews: bool,
    /// Status check contexts that must pass before merging
    pub required_status_checks: Vec<String>,
    pub enforce_admins: bool,
}

impl Default for BranchProtection {
    fn default() -> Self {
        Self {
            required_approvals: 1,
            dismiss_stale_reviews: true,
            required_status_checks: vec!["build".to_string()],
            enforce_admins: false,
        }
    }
}

/// A user or team that can be granted access
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum Principal {
    User(String),
    Team(String),
}

/// Repository permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorRole {
    Pull,
    Triage,
    #[default]
    Push,
    Maintain,
    Admin,
}

impl CollaboratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Triage => "triage",
            Self::Push => "push",
            Self::Maintain => "maintain",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub principal: Principal,
    #[serde(default)]
    pub role: CollaboratorRole,
}

/// Operations consumed from the source-control provider
#[async_trait]
pub trait SourceControlProvider: Send + Sync {
    async fn create_repository(&self, repo: &NewRepository)
    -> Result<RepositoryInfo, RepositoryError>;

    async fn get_repository(&self, name: &str) -> Result<RepositoryInfo, RepositoryError>;

    /// Push `commit` as a single commit on its branch
    async fn push_commit(
        &self,
        name: &str,
        commit: &CommitSet,
    ) -> Result<CommitOutcome, RepositoryError>;

    async fn set_branch_protection(
        &self,
        name: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), RepositoryError>;

    async fn add_collaborator(
        &self,
        name: &str,
        collaborator: &Collaborator,
    ) -> Result<(), RepositoryError>;

    async fn remove_collaborator(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<(), RepositoryError>;

    /// Replace the repository's topics
    async fn set_topics(&self, name: &str, topics: &[String]) -> Result<(), RepositoryError>;

    async fn delete_repository(&self, name: &str) -> Result<(), RepositoryError>;
}
