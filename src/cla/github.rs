use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::models::{CommitState, Gist, GistFile, PullRequest};
use crate::errors::CallError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = "cla-assistant";

/// GitHub caps `per_page` at 100.
pub const MAX_PER_PAGE: u32 = 100;

/// Upper bound on pages fetched by one listing.
pub const MAX_PAGES: u32 = 50;

/// Context tag of the commit status this service owns.
pub const STATUS_CONTEXT: &str = "licence/cla";

/// A named remote operation and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum GitHubRequest {
    ListPullRequests {
        owner: String,
        repo: String,
        page: u32,
        per_page: u32,
    },
    GetPullRequest {
        owner: String,
        repo: String,
        number: u64,
    },
    ListPullRequestCommits {
        owner: String,
        repo: String,
        number: u64,
        page: u32,
        per_page: u32,
    },
    CreateStatus {
        owner: String,
        repo: String,
        sha: String,
        state: CommitState,
        description: String,
        target_url: String,
        context: String,
    },
    RenderMarkdown {
        text: String,
        context: Option<String>,
    },
    GetUser {
        login: String,
    },
    GetAuthenticatedUser,
    GetRepository {
        owner: String,
        repo: String,
    },
    GetGist {
        id: String,
        version: Option<String>,
    },
    ListComments {
        owner: String,
        repo: String,
        number: u64,
        page: u32,
        per_page: u32,
    },
    CreateComment {
        owner: String,
        repo: String,
        number: u64,
        body: String,
    },
    EditComment {
        owner: String,
        repo: String,
        comment_id: u64,
        body: String,
    },
}

impl GitHubRequest {
    /// `(obj, fun)` name of the operation family, used in logs.
    pub fn operation(&self) -> (&'static str, &'static str) {
        match self {
            Self::ListPullRequests { .. } => ("pullRequests", "getAll"),
            Self::GetPullRequest { .. } => ("pullRequests", "get"),
            Self::ListPullRequestCommits { .. } => ("pullRequests", "getCommits"),
            Self::CreateStatus { .. } => ("statuses", "create"),
            Self::RenderMarkdown { .. } => ("markdown", "render"),
            Self::GetUser { .. } => ("users", "getFrom"),
            Self::GetAuthenticatedUser => ("users", "get"),
            Self::GetRepository { .. } => ("repos", "get"),
            Self::GetGist { .. } => ("gists", "get"),
            Self::ListComments { .. } => ("issues", "getComments"),
            Self::CreateComment { .. } => ("issues", "createComment"),
            Self::EditComment { .. } => ("issues", "editComment"),
        }
    }
}

/// One forge call: the operation plus the token to authenticate it with.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub request: GitHubRequest,
    pub token: Option<String>,
}

impl ApiCall {
    pub fn new(request: GitHubRequest, token: Option<&str>) -> Self {
        Self {
            request,
            token: token.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub data: serde_json::Value,
    /// `message` field of an error body, when GitHub sent one.
    pub message: Option<String>,
    pub has_next_page: bool,
}

impl ApiResponse {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        let message = data
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string);
        Self {
            status,
            data,
            message,
            has_next_page: false,
        }
    }

    pub fn ok(data: serde_json::Value) -> Self {
        Self::new(200, data)
    }

    pub fn with_next_page(mut self, has_next_page: bool) -> Self {
        self.has_next_page = has_next_page;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| CallError::new(format!("Failed to parse GitHub response: {}", e)))
    }
}

/// Abstraction over the forge API for testability.
/// Real implementation: `RestClient`.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn call(&self, call: ApiCall) -> Result<ApiResponse, CallError>;
}

// ── Wire types ───────────────────────────────────────────────────────

/// A GitHub user (subset of fields).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubUser {
    pub login: String,
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct GitHubHead {
    sha: Option<String>,
}

/// A GitHub pull request (subset of fields).
#[derive(Debug, Deserialize)]
struct GitHubPull {
    number: u64,
    user: Option<GitHubUser>,
    head: Option<GitHubHead>,
}

impl From<GitHubPull> for PullRequest {
    fn from(pull: GitHubPull) -> Self {
        Self {
            number: pull.number,
            author: pull.user.map(|u| u.login).unwrap_or_default(),
            head_sha: pull.head.and_then(|h| h.sha),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubCommitAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    author: Option<GitHubCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    /// Null when the commit email is not linked to an account.
    author: Option<GitHubUser>,
    commit: GitHubCommitDetail,
}

impl GitHubCommit {
    fn committer(self) -> Option<String> {
        match self.author {
            Some(user) => Some(user.login),
            None => self.commit.author.and_then(|a| a.name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubGistFile {
    filename: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubGistVersion {
    version: String,
}

#[derive(Debug, Deserialize)]
struct GitHubGist {
    html_url: String,
    #[serde(default)]
    files: BTreeMap<String, GitHubGistFile>,
    #[serde(default)]
    history: Vec<GitHubGistVersion>,
}

impl From<GitHubGist> for Gist {
    fn from(gist: GitHubGist) -> Self {
        Self {
            url: gist.html_url,
            files: gist
                .files
                .into_values()
                .map(|f| GistFile {
                    filename: f.filename,
                    content: f.content.unwrap_or_default(),
                })
                .collect(),
            history: gist.history.into_iter().map(|h| h.version).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GitHubPermissions {
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubRepository {
    /// Only present for authenticated requests.
    permissions: Option<GitHubPermissions>,
}

/// An issue comment (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    pub body: Option<String>,
}

// ── Typed helpers over `GitHubApi` ────────────────────────────────────

/// Fetch every page of a listing, starting at page 1.
/// Stops at the last page or on an empty page. A listing that still has
/// more pages after `MAX_PAGES` is an error rather than a partial result.
async fn collect_pages<T, F>(
    api: &dyn GitHubApi,
    token: Option<&str>,
    request_for_page: F,
) -> Result<Vec<T>, CallError>
where
    T: DeserializeOwned,
    F: Fn(u32) -> GitHubRequest,
{
    let mut items = Vec::new();

    for page in 1..=MAX_PAGES {
        let request = request_for_page(page);
        let (obj, fun) = request.operation();
        let resp = api.call(ApiCall::new(request, token)).await?;
        let batch: Vec<T> = resp.json()?;
        if batch.is_empty() || !resp.has_next_page {
            items.extend(batch);
            return Ok(items);
        }
        items.extend(batch);
        tracing::debug!(obj, fun, page, "Fetching next page");
    }

    Err(CallError::new(format!(
        "Listing has more than {} pages",
        MAX_PAGES
    )))
}

/// List open pull requests for a repository.
/// Paginates through all pages automatically.
pub async fn list_open_pull_requests(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    token: Option<&str>,
    per_page: u32,
) -> Result<Vec<PullRequest>, CallError> {
    let pulls: Vec<GitHubPull> = collect_pages(api, token, |page| GitHubRequest::ListPullRequests {
        owner: owner.to_string(),
        repo: repo.to_string(),
        page,
        per_page,
    })
    .await?;
    Ok(pulls.into_iter().map(PullRequest::from).collect())
}

pub async fn get_pull_request(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
    token: Option<&str>,
) -> Result<PullRequest, CallError> {
    let request = GitHubRequest::GetPullRequest {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
    };
    let pull: GitHubPull = api.call(ApiCall::new(request, token)).await?.json()?;
    Ok(pull.into())
}

/// Distinct committer logins of a pull request, in commit order, across
/// all commit pages.
pub async fn list_committers(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
    token: Option<&str>,
) -> Result<Vec<String>, CallError> {
    let commits: Vec<GitHubCommit> =
        collect_pages(api, token, |page| GitHubRequest::ListPullRequestCommits {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            page,
            per_page: MAX_PER_PAGE,
        })
        .await?;
    let mut committers: Vec<String> = Vec::new();
    for login in commits.into_iter().filter_map(GitHubCommit::committer) {
        if !committers.contains(&login) {
            committers.push(login);
        }
    }
    Ok(committers)
}

pub async fn get_user(
    api: &dyn GitHubApi,
    login: &str,
    token: Option<&str>,
) -> Result<GitHubUser, CallError> {
    let request = GitHubRequest::GetUser {
        login: login.to_string(),
    };
    api.call(ApiCall::new(request, token)).await?.json()
}

/// The user a token belongs to.
pub async fn get_authenticated_user(
    api: &dyn GitHubApi,
    token: &str,
) -> Result<GitHubUser, CallError> {
    api.call(ApiCall::new(GitHubRequest::GetAuthenticatedUser, Some(token)))
        .await?
        .json()
}

/// Whether the owner of `token` administers the repository.
pub async fn user_is_admin(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    token: &str,
) -> Result<bool, CallError> {
    let request = GitHubRequest::GetRepository {
        owner: owner.to_string(),
        repo: repo.to_string(),
    };
    let repository: GitHubRepository = api.call(ApiCall::new(request, Some(token))).await?.json()?;
    Ok(repository.permissions.unwrap_or_default().admin)
}

pub async fn get_gist(
    api: &dyn GitHubApi,
    id: &str,
    version: Option<&str>,
    token: Option<&str>,
) -> Result<Gist, CallError> {
    let request = GitHubRequest::GetGist {
        id: id.to_string(),
        version: version.map(str::to_string),
    };
    let gist: GitHubGist = api.call(ApiCall::new(request, token)).await?.json()?;
    Ok(gist.into())
}

/// All comments on a pull request's conversation, oldest first.
pub async fn list_comments(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
    token: Option<&str>,
) -> Result<Vec<GitHubComment>, CallError> {
    collect_pages(api, token, |page| GitHubRequest::ListComments {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
        page,
        per_page: MAX_PER_PAGE,
    })
    .await
}

// ── Token format ──────────────────────────────────────────────────────

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
];

/// Format check only; says nothing about whether the token is live.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty()
        && GITHUB_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
}

/// Whether a `Link` header advertises another page.
pub fn has_next_page(link: Option<&str>) -> bool {
    link.is_some_and(|l| l.split(',').any(|part| part.contains("rel=\"next\"")))
}

// ── REST implementation ───────────────────────────────────────────────

/// `GitHubApi` over the GitHub REST API.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_url: reqwest::Url,
    user_agent: String,
}

impl RestClient {
    pub fn new(api_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build GitHub HTTP client")?;
        let api_url = reqwest::Url::parse(api_url)
            .with_context(|| format!("Invalid GitHub API url: {}", api_url))?;
        if api_url.cannot_be_a_base() {
            anyhow::bail!("GitHub API url cannot carry a path: {}", api_url);
        }
        Ok(Self {
            http,
            api_url,
            user_agent: user_agent.to_string(),
        })
    }

    /// API url with `segments` appended, each percent-encoded as a single
    /// path segment (a `/` inside a login or repo name stays inside it).
    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn build(&self, request: &GitHubRequest) -> reqwest::RequestBuilder {
        match request {
            GitHubRequest::ListPullRequests {
                owner,
                repo,
                page,
                per_page,
            } => self
                .http
                .get(self.endpoint(&["repos", owner, repo, "pulls"]))
                .query(&[
                    ("state", "open".to_string()),
                    ("per_page", per_page.min(&MAX_PER_PAGE).to_string()),
                    ("page", page.to_string()),
                ]),
            GitHubRequest::GetPullRequest {
                owner,
                repo,
                number,
            } => self
                .http
                .get(self.endpoint(&["repos", owner, repo, "pulls", &number.to_string()])),
            GitHubRequest::ListPullRequestCommits {
                owner,
                repo,
                number,
                page,
                per_page,
            } => self
                .http
                .get(self.endpoint(&["repos", owner, repo, "pulls", &number.to_string(), "commits"]))
                .query(&[("per_page", *per_page.min(&MAX_PER_PAGE)), ("page", *page)]),
            GitHubRequest::CreateStatus {
                owner,
                repo,
                sha,
                state,
                description,
                target_url,
                context,
            } => self
                .http
                .post(self.endpoint(&["repos", owner, repo, "statuses", sha]))
                .json(&serde_json::json!({
                    "state": state.as_str(),
                    "description": description,
                    "target_url": target_url,
                    "context": context,
                })),
            GitHubRequest::RenderMarkdown { text, context } => {
                let mut body = serde_json::json!({"text": text, "mode": "gfm"});
                if let Some(context) = context {
                    body["context"] = serde_json::Value::String(context.clone());
                }
                self.http.post(self.endpoint(&["markdown"])).json(&body)
            }
            GitHubRequest::GetUser { login } => self.http.get(self.endpoint(&["users", login])),
            GitHubRequest::GetAuthenticatedUser => self.http.get(self.endpoint(&["user"])),
            GitHubRequest::GetRepository { owner, repo } => {
                self.http.get(self.endpoint(&["repos", owner, repo]))
            }
            GitHubRequest::GetGist { id, version } => {
                let url = match version {
                    Some(version) => self.endpoint(&["gists", id, version]),
                    None => self.endpoint(&["gists", id]),
                };
                self.http.get(url)
            }
            GitHubRequest::ListComments {
                owner,
                repo,
                number,
                page,
                per_page,
            } => self
                .http
                .get(self.endpoint(&["repos", owner, repo, "issues", &number.to_string(), "comments"]))
                .query(&[("per_page", *per_page.min(&MAX_PER_PAGE)), ("page", *page)]),
            GitHubRequest::CreateComment {
                owner,
                repo,
                number,
                body,
            } => self
                .http
                .post(self.endpoint(&["repos", owner, repo, "issues", &number.to_string(), "comments"]))
                .json(&serde_json::json!({"body": body})),
            GitHubRequest::EditComment {
                owner,
                repo,
                comment_id,
                body,
            } => self
                .http
                .patch(self.endpoint(&[
                    "repos",
                    owner,
                    repo,
                    "issues",
                    "comments",
                    &comment_id.to_string(),
                ]))
                .json(&serde_json::json!({"body": body})),
        }
    }
}

#[async_trait]
impl GitHubApi for RestClient {
    async fn call(&self, call: ApiCall) -> Result<ApiResponse, CallError> {
        let (obj, fun) = call.request.operation();
        let mut builder = self
            .build(&call.request)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", &self.user_agent);
        if let Some(token) = &call.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| CallError::new(format!("{}.{} request failed: {}", obj, fun, e)))?;

        let status = resp.status().as_u16();
        let next = has_next_page(
            resp.headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok()),
        );
        let text = resp
            .text()
            .await
            .map_err(|e| CallError::new(format!("{}.{} body read failed: {}", obj, fun, e)))?;

        let rendered = matches!(call.request, GitHubRequest::RenderMarkdown { .. });
        let data = if rendered && (200..300).contains(&status) {
            serde_json::Value::String(text)
        } else if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        let response = ApiResponse::new(status, data).with_next_page(next);
        if response.is_success() {
            Ok(response)
        } else {
            tracing::debug!(obj, fun, status, "GitHub call returned error status");
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| format!("GitHub returned status {}", status));
            Err(CallError::with_response(message, response))
        }
    }
}
