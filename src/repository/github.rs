//! GitHub REST adapter
//!
//! Pushes go through the git data API (blobs, tree, commit, ref update) so
//! an arbitrary file set lands as exactly one commit.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use crate::core::config::SourceControlConfig;
use crate::repository::{
    BranchProtection, Collaborator, CommitOutcome, CommitSet, NewRepository, Principal,
    RepositoryError, RepositoryInfo, SourceControlProvider,
};

/// GitHub implementation of [`SourceControlProvider`]
pub struct GitHubProvider {
    client: Client,
    api_url: Url,
    organization: String,
    token: Option<Zeroizing<String>>,
    token_env: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    full_name: String,
    html_url: String,
    clone_url: String,
    default_branch: String,
    private: bool,
    #[serde(default)]
    topics: Vec<String>,
}

impl From<RepositoryPayload> for RepositoryInfo {
    fn from(payload: RepositoryPayload) -> Self {
        Self {
            name: payload.name,
            full_name: payload.full_name,
            url: payload.html_url,
            clone_url: payload.clone_url,
            default_branch: payload.default_branch,
            private: payload.private,
            topics: payload.topics,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShaPayload {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    object: ShaPayload,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    tree: ShaPayload,
}

#[derive(Debug, Deserialize)]
struct TreePayload {
    sha: String,
    #[serde(default)]
    tree: Vec<TreeEntryPayload>,
}

#[derive(Debug, Deserialize)]
struct TreeEntryPayload {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubProvider {
    /// Build a provider; the token is read from `config.token_env` when
    /// `token` is `None`. A missing token fails at call time.
    pub fn new(
        config: &SourceControlConfig,
        token: Option<String>,
    ) -> Result<Self, RepositoryError> {
        let api_url = Url::parse(config.api_url.trim_end_matches('/'))
            .map_err(|e| RepositoryError::Transport(format!("invalid API URL: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .build()?;

        let token = token
            .or_else(|| std::env::var(&config.token_env).ok())
            .filter(|t| !t.trim().is_empty())
            .map(Zeroizing::new);

        Ok(Self {
            client,
            api_url,
            organization: config.organization.clone(),
            token,
            token_env: config.token_env.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    fn repo_path(&self, name: &str) -> String {
        format!("/repos/{}/{}", self.organization, name)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RepositoryError> {
        let token = self.token.as_ref().ok_or_else(|| {
            RepositoryError::Authentication(format!(
                "no API token found in ${}",
                self.token_env
            ))
        })?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| RepositoryError::Authentication("token is not a valid header".to_string()))?;
        value.set_sensitive(true);

        Ok(self
            .client
            .request(method, self.url(path))
            .header(AUTHORIZATION, value))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RepositoryError> {
        let response = builder.send().await?;
        check_status(response).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, RepositoryError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RepositoryError::Transport(format!("invalid response body: {e}")))
    }

    async fn create_blob(&self, name: &str, content: &[u8]) -> Result<String, RepositoryError> {
        let request = self
            .request(Method::POST, &format!("{}/git/blobs", self.repo_path(name)))?
            .json(&json!({ "content": STANDARD.encode(content), "encoding": "base64" }));
        Ok(self.send_json::<ShaPayload>(request).await?.sha)
    }
}

/// Map HTTP failures onto [`RepositoryError`]
async fn check_status(response: Response) -> Result<Response, RepositoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.clone());

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let exhausted = header("x-ratelimit-remaining") == Some("0");
    let retry_after = header("retry-after")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .or_else(|| {
            let reset = header("x-ratelimit-reset")?.parse::<i64>().ok()?;
            let wait = reset - chrono::Utc::now().timestamp();
            Some(Duration::from_secs(wait.max(0) as u64))
        });

    Err(match status {
        StatusCode::UNAUTHORIZED => RepositoryError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => RepositoryError::RateLimited { retry_after },
        StatusCode::FORBIDDEN if exhausted || header("retry-after").is_some() => {
            RepositoryError::RateLimited { retry_after }
        }
        StatusCode::FORBIDDEN => RepositoryError::Authentication(message),
        StatusCode::NOT_FOUND => RepositoryError::NotFound(message),
        StatusCode::UNPROCESSABLE_ENTITY if body.contains("already exists") => {
            RepositoryError::AlreadyExists(message)
        }
        _ => RepositoryError::api(status.as_u16(), message),
    })
}

#[async_trait]
impl SourceControlProvider for GitHubProvider {
    async fn create_repository(
        &self,
        repo: &NewRepository,
    ) -> Result<RepositoryInfo, RepositoryError> {
        let request = self
            .request(Method::POST, &format!("/orgs/{}/repos", self.organization))?
            .json(&json!({
                "name": repo.name,
                "description": repo.description,
                "private": repo.private,
                "auto_init": true,
            }));
        let mut info: RepositoryInfo = self.send_json::<RepositoryPayload>(request).await?.into();
        debug!(repository = %info.full_name, "Created repository");

        if !repo.topics.is_empty() {
            self.set_topics(&repo.name, &repo.topics).await?;
            info.topics = repo.topics.clone();
        }
        Ok(info)
    }

    async fn get_repository(&self, name: &str) -> Result<RepositoryInfo, RepositoryError> {
        let request = self.request(Method::GET, &self.repo_path(name))?;
        Ok(self.send_json::<RepositoryPayload>(request).await?.into())
    }

    async fn push_commit(
        &self,
        name: &str,
        commit: &CommitSet,
    ) -> Result<CommitOutcome, RepositoryError> {
        let repo = self.repo_path(name);

        let head: RefPayload = self
            .send_json(self.request(
                Method::GET,
                &format!("{repo}/git/ref/heads/{}", commit.branch),
            )?)
            .await?;
        let base_commit = head.object.sha;

        let parent: CommitPayload = self
            .send_json(self.request(Method::GET, &format!("{repo}/git/commits/{base_commit}"))?)
            .await?;
        let base_tree = parent.tree.sha;

        let mut entries = Vec::new();
        for (path, entry) in commit.files.iter() {
            let mode = if entry.executable { "100755" } else { "100644" };
            match entry.as_text() {
                Some(text) => entries.push(json!({
                    "path": path, "mode": mode, "type": "blob", "content": text,
                })),
                None => {
                    let sha = self.create_blob(name, &entry.content).await?;
                    entries.push(json!({
                        "path": path, "mode": mode, "type": "blob", "sha": sha,
                    }));
                }
            }
        }

        if let Some(dir) = &commit.replace_dir {
            let prefix = format!("{}/", dir.trim_end_matches('/'));
            let existing: TreePayload = self
                .send_json(self.request(
                    Method::GET,
                    &format!("{repo}/git/trees/{base_tree}?recursive=1"),
                )?)
                .await?;
            for stale in existing.tree.iter().filter(|e| {
                e.kind == "blob" && e.path.starts_with(&prefix) && !commit.files.contains(&e.path)
            }) {
                entries.push(json!({
                    "path": stale.path, "mode": "100644", "type": "blob", "sha": null,
                }));
            }
        }

        let tree: TreePayload = self
            .send_json(
                self.request(Method::POST, &format!("{repo}/git/trees"))?
                    .json(&json!({ "base_tree": base_tree, "tree": entries })),
            )
            .await?;

        if tree.sha == base_tree {
            debug!(repository = %name, sha = %base_commit, "Push left tree unchanged");
            return Ok(CommitOutcome::Unchanged { sha: base_commit });
        }

        let created: ShaPayload = self
            .send_json(
                self.request(Method::POST, &format!("{repo}/git/commits"))?
                    .json(&json!({
                        "message": commit.message,
                        "tree": tree.sha,
                        "parents": [base_commit],
                    })),
            )
            .await?;

        self.send(
            self.request(
                Method::PATCH,
                &format!("{repo}/git/refs/heads/{}", commit.branch),
            )?
            .json(&json!({ "sha": created.sha, "force": false })),
        )
        .await?;

        debug!(repository = %name, sha = %created.sha, files = commit.files.len(), "Pushed commit");
        Ok(CommitOutcome::Committed { sha: created.sha })
    }

    async fn set_branch_protection(
        &self,
        name: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), RepositoryError> {
        let status_checks = if rules.required_status_checks.is_empty() {
            Value::Null
        } else {
            json!({ "strict": true, "contexts": rules.required_status_checks })
        };
        let request = self
            .request(
                Method::PUT,
                &format!("{}/branches/{branch}/protection", self.repo_path(name)),
            )?
            .json(&json!({
                "required_status_checks": status_checks,
                "enforce_admins": rules.enforce_admins,
                "required_pull_request_reviews": {
                    "required_approving_review_count": rules.required_approvals,
                    "dismiss_stale_reviews": rules.dismiss_stale_reviews,
                },
                "restrictions": null,
            }));
        self.send(request).await?;
        Ok(())
    }

    async fn add_collaborator(
        &self,
        name: &str,
        collaborator: &Collaborator,
    ) -> Result<(), RepositoryError> {
        let path = match &collaborator.principal {
            Principal::User(user) => format!("{}/collaborators/{user}", self.repo_path(name)),
            Principal::Team(team) => format!(
                "/orgs/{org}/teams/{team}/repos/{org}/{name}",
                org = self.organization
            ),
        };
        let request = self
            .request(Method::PUT, &path)?
            .json(&json!({ "permission": collaborator.role.as_str() }));
        self.send(request).await?;
        Ok(())
    }

    async fn remove_collaborator(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<(), RepositoryError> {
        let path = match principal {
            Principal::User(user) => format!("{}/collaborators/{user}", self.repo_path(name)),
            Principal::Team(team) => format!(
                "/orgs/{org}/teams/{team}/repos/{org}/{name}",
                org = self.organization
            ),
        };
        self.send(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    async fn set_topics(&self, name: &str, topics: &[String]) -> Result<(), RepositoryError> {
        let request = self
            .request(Method::PUT, &format!("{}/topics", self.repo_path(name)))?
            .json(&json!({ "names": topics }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete_repository(&self, name: &str) -> Result<(), RepositoryError> {
        self.send(self.request(Method::DELETE, &self.repo_path(name))?)
            .await?;
        debug!(repository = %name, "Deleted repository");
        Ok(())
    }
}
