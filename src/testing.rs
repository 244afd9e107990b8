//! In-memory collaborators for unit tests
//!
//! Each mock counts its calls so tests can assert that nothing external
//! happened, and can be primed to fail the next call of an operation.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::{CommandExecutor, CommandResult};
use crate::infra::{EngineError, InfraConfig, InfrastructureEngine, PlanSummary};
use crate::repository::{
    BranchProtection, Collaborator, CommitOutcome, CommitSet, NewRepository, Principal,
    RepositoryError, RepositoryInfo, SourceControlProvider,
};
use crate::templates::FileTree;
use crate::verification::{HealthProbe, ProbeError, ProbeResponse};

/// Call counters plus queued failures, shared by the mocks
struct Script<E> {
    calls: HashMap<String, usize>,
    failures: HashMap<String, VecDeque<E>>,
}

impl<E> Default for Script<E> {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            failures: HashMap::new(),
        }
    }
}

impl<E> Script<E> {
    fn record(&mut self, op: &str) -> Option<E> {
        *self.calls.entry(op.to_string()).or_default() += 1;
        self.failures.get_mut(op).and_then(VecDeque::pop_front)
    }

    fn fail_next(&mut self, op: &str, error: E) {
        self.failures.entry(op.to_string()).or_default().push_back(error);
    }

    fn calls(&self, op: &str) -> usize {
        self.calls.get(op).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.calls.values().sum()
    }
}

#[derive(Debug, Clone)]
struct MockRepository {
    info: RepositoryInfo,
    files: FileTree,
    head: Option<String>,
    commits: usize,
    protection: Option<BranchProtection>,
    collaborators: Vec<Collaborator>,
}

/// Source-control provider backed by a map of repositories
#[derive(Default)]
pub struct MockProvider {
    repos: Mutex<HashMap<String, MockRepository>>,
    script: Mutex<Script<RepositoryError>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: &str, error: RepositoryError) {
        self.script.lock().unwrap().fail_next(op, error);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.script.lock().unwrap().calls(op)
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().total()
    }

    pub fn repository_count(&self) -> usize {
        self.repos.lock().unwrap().len()
    }

    pub fn repository_exists(&self, name: &str) -> bool {
        self.repos.lock().unwrap().contains_key(name)
    }

    pub fn commit_count(&self, name: &str) -> usize {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.commits)
            .unwrap_or(0)
    }

    /// Files on the default branch
    pub fn files(&self, name: &str) -> FileTree {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.files.clone())
            .unwrap_or_default()
    }

    pub fn topics(&self, name: &str) -> Vec<String> {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.info.topics.clone())
            .unwrap_or_default()
    }

    pub fn protection(&self, name: &str) -> Option<BranchProtection> {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .and_then(|r| r.protection.clone())
    }

    pub fn collaborators(&self, name: &str) -> Vec<Collaborator> {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.collaborators.clone())
            .unwrap_or_default()
    }

    fn check(&self, op: &str) -> Result<(), RepositoryError> {
        match self.script.lock().unwrap().record(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_repo<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MockRepository) -> T,
    ) -> Result<T, RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(format!("repository {name}")))?;
        Ok(f(repo))
    }
}

#[async_trait]
impl SourceControlProvider for MockProvider {
    async fn create_repository(
        &self,
        repo: &NewRepository,
    ) -> Result<RepositoryInfo, RepositoryError> {
        self.check("create_repository")?;
        let mut repos = self.repos.lock().unwrap();
        if repos.contains_key(&repo.name) {
            return Err(RepositoryError::AlreadyExists(repo.name.clone()));
        }
        let info = RepositoryInfo {
            name: repo.name.clone(),
            full_name: format!("acme/{}", repo.name),
            url: format!("https://github.com/acme/{}", repo.name),
            clone_url: format!("https://github.com/acme/{}.git", repo.name),
            default_branch: "main".to_string(),
            private: repo.private,
            topics: repo.topics.clone(),
        };
        repos.insert(
            repo.name.clone(),
            MockRepository {
                info: info.clone(),
                files: FileTree::new(),
                head: None,
                commits: 0,
                protection: None,
                collaborators: Vec::new(),
            },
        );
        Ok(info)
    }

    async fn get_repository(&self, name: &str) -> Result<RepositoryInfo, RepositoryError> {
        self.check("get_repository")?;
        self.with_repo(name, |r| r.info.clone())
    }

    async fn push_commit(
        &self,
        name: &str,
        commit: &CommitSet,
    ) -> Result<CommitOutcome, RepositoryError> {
        self.check("push_commit")?;
        self.with_repo(name, |repo| {
            let mut next = FileTree::new();
            for (path, entry) in repo.files.iter() {
                let replaced = commit
                    .replace_dir
                    .as_deref()
                    .is_some_and(|dir| path.starts_with(&format!("{}/", dir.trim_end_matches('/'))));
                if !replaced {
                    next.insert_entry(path, entry.clone());
                }
            }
            for (path, entry) in commit.files.iter() {
                next.insert_entry(path, entry.clone());
            }

            match &repo.head {
                Some(head) if next == repo.files => CommitOutcome::Unchanged { sha: head.clone() },
                _ => {
                    repo.commits += 1;
                    let hash = next.content_hash();
                    let sha = format!(
                        "{}{:08x}",
                        &hash.trim_start_matches("sha256:")[..32],
                        repo.commits
                    );
                    repo.files = next;
                    repo.head = Some(sha.clone());
                    CommitOutcome::Committed { sha }
                }
            }
        })
    }

    async fn set_branch_protection(
        &self,
        name: &str,
        _branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), RepositoryError> {
        self.check("set_branch_protection")?;
        self.with_repo(name, |r| r.protection = Some(rules.clone()))
    }

    async fn add_collaborator(
        &self,
        name: &str,
        collaborator: &Collaborator,
    ) -> Result<(), RepositoryError> {
        self.check("add_collaborator")?;
        self.with_repo(name, |r| {
            r.collaborators.retain(|c| c.principal != collaborator.principal);
            r.collaborators.push(collaborator.clone());
        })
    }

    async fn remove_collaborator(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<(), RepositoryError> {
        self.check("remove_collaborator")?;
        let removed = self.with_repo(name, |r| {
            let before = r.collaborators.len();
            r.collaborators.retain(|c| &c.principal != principal);
            before != r.collaborators.len()
        })?;
        if removed {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(format!("collaborator {principal:?}")))
        }
    }

    async fn set_topics(&self, name: &str, topics: &[String]) -> Result<(), RepositoryError> {
        self.check("set_topics")?;
        self.with_repo(name, |r| r.info.topics = topics.to_vec())
    }

    async fn delete_repository(&self, name: &str) -> Result<(), RepositoryError> {
        self.check("delete_repository")?;
        match self.repos.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("repository {name}"))),
        }
    }
}

/// Infrastructure engine that remembers applied module hashes per identity
#[derive(Default)]
pub struct MockEngine {
    applied: Mutex<HashMap<String, String>>,
    script: Mutex<Script<EngineError>>,
    apply_delay: Mutex<Option<Duration>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: &str, error: EngineError) {
        self.script.lock().unwrap().fail_next(op, error);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.script.lock().unwrap().calls(op)
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().total()
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock().unwrap() = Some(delay);
    }

    pub fn is_applied(&self, identity: &str) -> bool {
        self.applied.lock().unwrap().contains_key(identity)
    }

    fn check(&self, op: &str) -> Result<(), EngineError> {
        match self.script.lock().unwrap().record(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InfrastructureEngine for MockEngine {
    async fn plan(&self, config: &InfraConfig) -> Result<PlanSummary, EngineError> {
        self.check("plan")?;
        let applied = self.applied.lock().unwrap();
        match applied.get(&config.identity.to_string()) {
            Some(hash) if *hash == config.module_graph.content_hash() => {
                Ok(PlanSummary::no_changes())
            }
            _ => Ok(PlanSummary::changes("Plan: 12 to add, 0 to change, 0 to destroy.")),
        }
    }

    async fn apply(&self, config: &InfraConfig) -> Result<(), EngineError> {
        self.check("apply")?;
        let delay = *self.apply_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.applied.lock().unwrap().insert(
            config.identity.to_string(),
            config.module_graph.content_hash(),
        );
        Ok(())
    }

    async fn outputs(&self, config: &InfraConfig) -> Result<BTreeMap<String, Value>, EngineError> {
        self.check("outputs")?;
        let identity = config.identity.to_string();
        if !self.applied.lock().unwrap().contains_key(&identity) {
            return Ok(BTreeMap::new());
        }
        let outputs = json!({
            "service_url": { "value": format!("http://{identity}.elb.example.com") },
            "cluster_id": { "value": format!("arn:aws:ecs:cluster/{identity}") },
            "service_id": { "value": format!("arn:aws:ecs:service/{identity}") },
            "registry_url": { "value": format!("123456789.dkr.ecr.us-east-1.amazonaws.com/{}", config.identity.muppet) },
        });
        Ok(serde_json::from_value(outputs).unwrap_or_default())
    }

    async fn destroy(&self, config: &InfraConfig) -> Result<(), EngineError> {
        self.check("destroy")?;
        self.applied
            .lock()
            .unwrap()
            .remove(&config.identity.to_string());
        Ok(())
    }
}

/// Command executor returning canned results by command prefix
#[derive(Default)]
pub struct MockCommandExecutor {
    responses: Mutex<Vec<(String, CommandResult)>>,
    commands: Mutex<Vec<String>>,
}

impl MockCommandExecutor {
    /// Every command succeeds with empty output unless primed otherwise
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, result: CommandResult) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), result));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for MockCommandExecutor {
    async fn execute(&self, command: &str, _working_dir: &Path) -> std::io::Result<CommandResult> {
        self.commands.lock().unwrap().push(command.to_string());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

/// Health probe answering every request with one status
pub struct MockHealthProbe {
    status: Mutex<u16>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<String>>,
}

impl MockHealthProbe {
    pub fn new(status: u16) -> Self {
        Self {
            status: Mutex::new(status),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError> {
        self.requests.lock().unwrap().push(url.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ProbeResponse {
            status: *self.status.lock().unwrap(),
            elapsed: Duration::from_millis(5),
        })
    }
}
