//! Idempotent repository operations keyed by muppet name
//!
//! Every provider call goes through the shared retry policy and the
//! source-control call gate.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{CallGate, RetryPolicy};
use crate::repository::provider::{STATUS_TOPIC_PREFIX, TEMPLATE_TOPIC_PREFIX};
use crate::repository::{
    BranchProtection, Collaborator, CommitOutcome, CommitSet, NewRepository, Principal,
    RepositoryError, RepositoryInfo, SourceControlProvider,
};

/// Repository settings applied to every muppet
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub private: bool,
    pub default_branch: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            private: true,
            default_branch: "main".to_string(),
        }
    }
}

pub struct RepositoryManager {
    provider: Arc<dyn SourceControlProvider>,
    retry: RetryPolicy,
    gate: CallGate,
    settings: RepositorySettings,
}

impl RepositoryManager {
    pub fn new(
        provider: Arc<dyn SourceControlProvider>,
        retry: RetryPolicy,
        gate: CallGate,
        settings: RepositorySettings,
    ) -> Self {
        Self {
            provider,
            retry,
            gate,
            settings,
        }
    }

    pub fn default_branch(&self) -> &str {
        &self.settings.default_branch
    }

    async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        self.retry.run(operation, || self.gate.run(f())).await
    }

    /// Create the muppet's repository
    ///
    /// An existing repository tagged with the same template counts as
    /// success; one tagged with another template is a conflict. An untagged
    /// one is left over from an interrupted create and gets tagged.
    pub async fn create_repository(
        &self,
        name: &str,
        template: &str,
        description: &str,
    ) -> Result<RepositoryInfo, RepositoryError> {
        // The template tag is set as its own retried step
        let request = NewRepository {
            name: name.to_string(),
            description: description.to_string(),
            private: self.settings.private,
            topics: Vec::new(),
        };

        let info = match self
            .call("create_repository", || self.provider.create_repository(&request))
            .await
        {
            Ok(info) => {
                info!(muppet = %name, repository = %info.full_name, "Created repository");
                info
            }
            Err(RepositoryError::AlreadyExists(_)) => {
                let existing = self.describe_repository(name).await?;
                let tag = existing.template_tag().map(str::to_string);
                match tag.as_deref() {
                    Some(tag) if tag == template => {
                        info!(muppet = %name, "Repository already exists for this template");
                        return Ok(existing);
                    }
                    Some(other) => {
                        return Err(RepositoryError::Conflict(format!(
                            "repository '{name}' exists with template '{other}', requested '{template}'"
                        )));
                    }
                    None => {
                        info!(muppet = %name, "Resuming untagged repository");
                        existing
                    }
                }
            }
            Err(error) => return Err(error),
        };

        self.tag_template(info, template).await
    }

    async fn tag_template(
        &self,
        mut info: RepositoryInfo,
        template: &str,
    ) -> Result<RepositoryInfo, RepositoryError> {
        let mut topics = info.topics.clone();
        topics.push(format!("{TEMPLATE_TOPIC_PREFIX}{template}"));
        self.call("tag_repository", || {
            self.provider.set_topics(&info.name, &topics)
        })
        .await?;
        info.topics = topics;
        Ok(info)
    }

    pub async fn describe_repository(&self, name: &str) -> Result<RepositoryInfo, RepositoryError> {
        self.call("describe_repository", || self.provider.get_repository(name))
            .await
    }

    /// Push files as one commit; identical content yields `Unchanged`
    pub async fn push_files(
        &self,
        name: &str,
        commit: &CommitSet,
    ) -> Result<CommitOutcome, RepositoryError> {
        let outcome = self
            .call("push_files", || self.provider.push_commit(name, commit))
            .await?;
        info!(muppet = %name, sha = %outcome.sha(), files = commit.files.len(), "Pushed files");
        Ok(outcome)
    }

    pub async fn configure_branch_protection(
        &self,
        name: &str,
        rules: &BranchProtection,
    ) -> Result<(), RepositoryError> {
        let branch = self.settings.default_branch.as_str();
        self.call("configure_branch_protection", || {
            self.provider.set_branch_protection(name, branch, rules)
        })
        .await
    }

    pub async fn set_collaborator(
        &self,
        name: &str,
        collaborator: &Collaborator,
    ) -> Result<(), RepositoryError> {
        self.call("set_collaborator", || {
            self.provider.add_collaborator(name, collaborator)
        })
        .await
    }

    /// Remove access; a principal without access is already satisfied
    ///
    /// A missing repository is still an error.
    pub async fn remove_collaborator(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<(), RepositoryError> {
        self.describe_repository(name).await?;
        match self
            .call("remove_collaborator", || {
                self.provider.remove_collaborator(name, principal)
            })
            .await
        {
            Err(RepositoryError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Mirror the lifecycle status as a repository topic
    pub async fn set_status_tag(&self, name: &str, status: &str) -> Result<(), RepositoryError> {
        let current = self.describe_repository(name).await?;
        let status_topic = format!("{STATUS_TOPIC_PREFIX}{status}");
        if current.topics.contains(&status_topic) {
            return Ok(());
        }

        let mut topics: Vec<String> = current
            .topics
            .into_iter()
            .filter(|t| !t.starts_with(STATUS_TOPIC_PREFIX))
            .collect();
        topics.push(status_topic);

        self.call("set_status_tag", || self.provider.set_topics(name, &topics))
            .await
    }

    /// Delete the repository; returns `false` when it was already gone
    pub async fn delete_repository(&self, name: &str) -> Result<bool, RepositoryError> {
        match self
            .call("delete_repository", || self.provider.delete_repository(name))
            .await
        {
            Ok(()) => {
                info!(muppet = %name, "Deleted repository");
                Ok(true)
            }
            Err(RepositoryError::NotFound(_)) => {
                warn!(muppet = %name, "Repository already absent");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use crate::templates::FileTree;

    fn manager(provider: Arc<MockProvider>) -> RepositoryManager {
        RepositoryManager::new(
            provider,
            RetryPolicy::immediate(3),
            CallGate::new("source_control", 2),
            RepositorySettings::default(),
        )
    }

    fn files(content: &str) -> FileTree {
        let mut tree = FileTree::new();
        tree.insert("README.md", content);
        tree
    }

    #[tokio::test]
    async fn test_create_is_idempotent_for_same_template() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());

        let first = manager
            .create_repository("billing-svc", "java-micronaut", "Billing")
            .await
            .unwrap();
        let second = manager
            .create_repository("billing-svc", "java-micronaut", "Billing")
            .await
            .unwrap();

        assert_eq!(first.full_name, second.full_name);
        assert_eq!(provider.repository_count(), 1);
    }

    #[tokio::test]
    async fn test_create_with_other_template_conflicts() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());

        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();
        let err = manager
            .create_repository("billing-svc", "rust-axum", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_next("create_repository", RepositoryError::RateLimited { retry_after: None });
        provider.fail_next("create_repository", RepositoryError::RateLimited { retry_after: None });
        let manager = manager(provider.clone());

        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();
        assert_eq!(provider.calls("create_repository"), 3);
    }

    #[tokio::test]
    async fn test_authentication_is_not_retried() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_next(
            "create_repository",
            RepositoryError::Authentication("bad token".to_string()),
        );
        let manager = manager(provider.clone());

        let err = manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Authentication(_)));
        assert_eq!(provider.calls("create_repository"), 1);
    }

    #[tokio::test]
    async fn test_repeated_push_is_unchanged() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());
        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();

        let commit = CommitSet::new("main", "Initial", files("v1"));
        let first = manager.push_files("billing-svc", &commit).await.unwrap();
        let second = manager.push_files("billing-svc", &commit).await.unwrap();

        assert!(matches!(first, CommitOutcome::Committed { .. }));
        assert_eq!(second, CommitOutcome::Unchanged { sha: first.sha().to_string() });
        assert_eq!(provider.commit_count("billing-svc"), 1);
    }

    #[tokio::test]
    async fn test_delete_treats_missing_as_done() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());

        assert!(!manager.delete_repository("ghost").await.unwrap());

        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();
        assert!(manager.delete_repository("billing-svc").await.unwrap());
        assert_eq!(provider.repository_count(), 0);
    }

    #[tokio::test]
    async fn test_status_tag_replaces_previous_status() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());
        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();

        manager.set_status_tag("billing-svc", "code-pushed").await.unwrap();
        manager.set_status_tag("billing-svc", "active").await.unwrap();

        let info = manager.describe_repository("billing-svc").await.unwrap();
        assert_eq!(info.status_tag(), Some("active"));
        assert_eq!(info.template_tag(), Some("java-micronaut"));
        assert_eq!(info.topics.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_collaborator_is_ok() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());
        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();

        manager
            .remove_collaborator("billing-svc", &Principal::User("octocat".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_collaborator_from_missing_repository_fails() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone());

        let err = manager
            .remove_collaborator("no-such-repo", &Principal::User("octocat".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(provider.calls("remove_collaborator"), 0);
    }

    #[tokio::test]
    async fn test_failed_tagging_is_retried_without_recreating() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_next("set_topics", RepositoryError::api(502, "bad gateway"));
        let manager = manager(provider.clone());

        let info = manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();
        assert_eq!(info.template_tag(), Some("java-micronaut"));
        assert_eq!(provider.calls("create_repository"), 1);
        assert_eq!(provider.calls("set_topics"), 2);
    }

    #[tokio::test]
    async fn test_untagged_repository_is_resumed() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_next(
            "set_topics",
            RepositoryError::Authentication("token revoked".to_string()),
        );
        let manager = manager(provider.clone());

        // First create leaves an untagged repository behind
        manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap_err();
        assert!(provider.topics("billing-svc").is_empty());

        let info = manager
            .create_repository("billing-svc", "java-micronaut", "")
            .await
            .unwrap();
        assert_eq!(info.template_tag(), Some("java-micronaut"));
        assert_eq!(provider.topics("billing-svc"), vec!["template-java-micronaut".to_string()]);
        assert_eq!(provider.repository_count(), 1);
    }
}
