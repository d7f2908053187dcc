//! CLA orchestrator.
//!
//! Each operation takes a [`Request`] (caller plus arguments) and composes the
//! injected ports: repository directory, record store, forge client, and the
//! two fire-and-forget sinks for commit statuses and summary comments.
//!
//! Forge calls authenticate with the caller's token when there is one, else
//! with the repository's stored token, else anonymously.

use std::sync::Arc;

use futures::future::join_all;

use super::comment::CommentDispatch;
use super::github::{self, ApiCall, ApiResponse, GitHubApi, GitHubRequest, MAX_PER_PAGE};
use super::models::*;
use super::status::StatusDispatch;
use super::store::{ClaStore, RepoDirectory};
use crate::errors::{CallError, ClaError};

/// Token to use for a forge call: caller first, then the repository.
pub fn effective_token<'a>(user_token: Option<&'a str>, repo: Option<&'a RepoConfig>) -> Option<&'a str> {
    user_token.or_else(|| repo.and_then(|r| r.token.as_deref()))
}

/// Decide whether a markdown render succeeded.
///
/// A call error is ignored when the response that came with it is a 200. A
/// non-2xx response fails with the body's `message` when it has one.
pub fn interpret_render(result: Result<ApiResponse, CallError>) -> Result<ApiResponse, ClaError> {
    match result {
        Ok(resp) if resp.is_success() => Ok(resp),
        Ok(resp) => Err(ClaError::Render(resp.message.clone().unwrap_or_else(|| {
            format!("Markdown render returned status {}", resp.status)
        }))),
        Err(err) => match err.response {
            Some(resp) if resp.status == 200 => Ok(resp),
            Some(ApiResponse {
                message: Some(message),
                ..
            }) => Err(ClaError::Render(message)),
            _ => Err(ClaError::Render(err.message)),
        },
    }
}

pub struct ClaOrchestrator {
    github: Arc<dyn GitHubApi>,
    repos: Arc<dyn RepoDirectory>,
    store: Arc<dyn ClaStore>,
    status: Arc<dyn StatusDispatch>,
    comments: Arc<dyn CommentDispatch>,
    per_page: u32,
}

impl ClaOrchestrator {
    pub fn new(
        github: Arc<dyn GitHubApi>,
        repos: Arc<dyn RepoDirectory>,
        store: Arc<dyn ClaStore>,
        status: Arc<dyn StatusDispatch>,
        comments: Arc<dyn CommentDispatch>,
    ) -> Self {
        Self {
            github,
            repos,
            store,
            status,
            comments,
            per_page: MAX_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    /// Repository lookup that tolerates a missing repository when the caller
    /// brought their own gist reference.
    async fn repo_for_gist(
        &self,
        owner: &str,
        repo: &str,
        gist: Option<&GistRef>,
    ) -> Result<Option<RepoConfig>, ClaError> {
        match self.repos.get(owner, repo).await {
            Ok(config) => Ok(Some(config)),
            Err(e) if gist.is_some() => {
                tracing::debug!(owner, repo, error = %e, "Repository lookup failed, using supplied gist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_gist(
        explicit: Option<&GistRef>,
        repo: Option<&RepoConfig>,
    ) -> Result<GistRef, ClaError> {
        explicit
            .or_else(|| repo.map(|r| &r.gist))
            .cloned()
            .ok_or_else(|| ClaError::NotFound("No CLA gist is linked".into()))
    }

    /// The CLA document for a repository, rendered to HTML.
    pub async fn get(&self, req: Request<GistArgs>) -> Result<RenderedCla, ClaError> {
        let args = &req.args;
        let repo = self
            .repo_for_gist(&args.owner, &args.repo, args.gist.as_ref())
            .await?;
        let gist = Self::resolve_gist(args.gist.as_ref(), repo.as_ref())?;
        let token = effective_token(req.user_token(), repo.as_ref());

        let document = self
            .store
            .get_gist(GistQuery {
                gist,
                token: token.map(str::to_string),
            })
            .await?;

        let request = GitHubRequest::RenderMarkdown {
            text: document.agreement_text().to_string(),
            context: None,
        };
        let rendered = interpret_render(self.github.call(ApiCall::new(request, token)).await)?;
        Ok(RenderedCla {
            raw: rendered.data.as_str().unwrap_or_default().to_string(),
        })
    }

    /// The raw gist document, without rendering.
    pub async fn get_gist(&self, req: Request<GistArgs>) -> Result<Gist, ClaError> {
        let args = &req.args;
        let repo = self
            .repo_for_gist(&args.owner, &args.repo, args.gist.as_ref())
            .await?;
        let gist = Self::resolve_gist(args.gist.as_ref(), repo.as_ref())?;
        let token = effective_token(req.user_token(), repo.as_ref());
        self.store
            .get_gist(GistQuery {
                gist,
                token: token.map(str::to_string),
            })
            .await
    }

    /// Record the caller's signature, then refresh the status of every open
    /// pull request they authored.
    pub async fn sign(&self, req: Request<RepoArgs>) -> Result<Signature, ClaError> {
        let user = req.user.as_ref().ok_or(ClaError::Unauthenticated)?;
        let RepoArgs { owner, repo } = &req.args;

        let signature = self
            .store
            .sign(SignQuery {
                owner: owner.clone(),
                repo: repo.clone(),
                user: user.login.clone(),
                user_id: user.id,
            })
            .await
            .map_err(|e| ClaError::Sign(e.to_string()))?;

        let config = self.repos.get(owner, repo).await.ok();
        let token = effective_token(req.user_token(), config.as_ref());
        match github::list_open_pull_requests(self.github.as_ref(), owner, repo, token, self.per_page)
            .await
        {
            Ok(pulls) => {
                for pull in pulls.iter().filter(|p| p.author == user.login) {
                    self.propagate(owner, repo, pull.number).await;
                }
            }
            Err(e) => tracing::warn!(owner = %owner, repo = %repo, error = %e, "Failed to list open pull requests after sign"),
        }

        Ok(signature)
    }

    /// Check one pull request and dispatch its status and comment updates.
    async fn propagate(&self, owner: &str, repo: &str, number: u64) {
        let check = match self
            .store
            .check(CheckQuery {
                owner: owner.to_string(),
                repo: repo.to_string(),
                user: None,
                gist: None,
                number: Some(number),
            })
            .await
        {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!(owner, repo, number, error = %e, "CLA check failed, skipping pull request");
                return;
            }
        };

        self.status.dispatch(StatusUpdate {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            signed: check.signed,
        });
        if let Some(user_map) = check.user_map {
            self.comments.edit_comment(CommentEdit {
                owner: owner.to_string(),
                repo: repo.to_string(),
                number,
                signed: check.signed,
                user_map: Some(user_map),
            });
        }
    }

    pub async fn check(&self, req: Request<CheckArgs>) -> Result<CheckResult, ClaError> {
        let user = req
            .args
            .user
            .clone()
            .or_else(|| req.user.as_ref().map(|u| u.login.clone()));
        self.store
            .check(CheckQuery {
                owner: req.args.owner.clone(),
                repo: req.args.repo.clone(),
                user,
                gist: req.args.gist.clone(),
                number: req.args.number,
            })
            .await
            .map_err(|e| match e {
                ClaError::BadRequest(_) | ClaError::NotFound(_) => e,
                other => ClaError::Check(other.to_string()),
            })
    }

    pub async fn get_all(&self, req: Request<GistArgs>) -> Result<Vec<Signature>, ClaError> {
        let args = &req.args;
        let gist = match &args.gist {
            Some(gist) => gist.clone(),
            None => self.repos.get(&args.owner, &args.repo).await?.gist,
        };
        self.store
            .get_all(AllQuery {
                owner: args.owner.clone(),
                repo: args.repo.clone(),
                gist,
            })
            .await
    }

    /// Number of signatures for a complete gist reference (url and version).
    pub async fn count_cla(&self, req: Request<GistArgs>) -> Result<usize, ClaError> {
        let args = &req.args;
        let repo = self
            .repo_for_gist(&args.owner, &args.repo, args.gist.as_ref())
            .await?;
        let mut gist = Self::resolve_gist(args.gist.as_ref(), repo.as_ref())?;

        if gist.version.is_none() {
            gist.version = match repo.as_ref().filter(|r| r.gist.url == gist.url) {
                Some(config) if config.gist.version.is_some() => config.gist.version.clone(),
                _ => {
                    let token = effective_token(req.user_token(), repo.as_ref());
                    let document = self
                        .store
                        .get_gist(GistQuery {
                            gist: gist.clone(),
                            token: token.map(str::to_string),
                        })
                        .await?;
                    document.current_version().map(str::to_string)
                }
            };
        }

        let signatures = self
            .store
            .get_all(AllQuery {
                owner: args.owner.clone(),
                repo: args.repo.clone(),
                gist,
            })
            .await?;
        Ok(signatures.len())
    }

    pub async fn get_last_signature(
        &self,
        req: Request<RepoArgs>,
    ) -> Result<Option<Signature>, ClaError> {
        let user = req.user.as_ref().ok_or(ClaError::Unauthenticated)?;
        let config = self.repos.get(&req.args.owner, &req.args.repo).await?;
        self.store
            .get_last_signature(LastSignatureQuery {
                owner: req.args.owner.clone(),
                repo: req.args.repo.clone(),
                user: user.login.clone(),
                gist_url: config.gist.url,
            })
            .await
    }

    /// All signatures of a user across repositories.
    pub async fn get_signed_cla(
        &self,
        req: Request<SignedClaArgs>,
    ) -> Result<Vec<Signature>, ClaError> {
        let user = req
            .args
            .user
            .clone()
            .or_else(|| req.user.as_ref().map(|u| u.login.clone()))
            .ok_or(ClaError::Unauthenticated)?;
        self.store.get_signed_cla(&user).await
    }

    /// Sign on behalf of a list of logins. Returns `None` for an empty list.
    pub async fn upload(&self, req: Request<UploadArgs>) -> Result<Option<UploadReport>, ClaError> {
        let users = match req.args.users.as_deref() {
            Some(users) if !users.is_empty() => users,
            _ => return Ok(None),
        };
        let config = self.repos.get(&req.args.owner, &req.args.repo).await.ok();
        let token = effective_token(req.user_token(), config.as_ref());

        let outcomes = join_all(users.iter().map(|login| self.upload_one(&req.args, login, token))).await;

        let mut report = UploadReport::default();
        for (login, outcome) in users.iter().zip(outcomes) {
            match outcome {
                UploadOutcome::Signed => report.signed.push(login.clone()),
                UploadOutcome::Skipped => report.skipped.push(login.clone()),
                UploadOutcome::Failed => report.failed.push(login.clone()),
            }
        }
        tracing::info!(
            owner = %req.args.owner,
            repo = %req.args.repo,
            signed = report.signed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Upload finished"
        );
        Ok(Some(report))
    }

    async fn upload_one(&self, args: &UploadArgs, login: &str, token: Option<&str>) -> UploadOutcome {
        let user = match github::get_user(self.github.as_ref(), login, token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!(login, error = %e, "Could not resolve user, skipping");
                return UploadOutcome::Skipped;
            }
        };
        let query = SignQuery {
            owner: args.owner.clone(),
            repo: args.repo.clone(),
            user: login.to_string(),
            user_id: user.id,
        };
        match self.store.sign(query).await {
            Ok(_) => UploadOutcome::Signed,
            Err(e) => {
                tracing::warn!(login, error = %e, "Failed to record uploaded signature");
                UploadOutcome::Failed
            }
        }
    }

    /// Re-check every open pull request of a repository.
    pub async fn validate_pull_requests(
        &self,
        req: Request<ValidateArgs>,
    ) -> Result<ValidationSummary, ClaError> {
        let ValidateArgs { owner, repo, token } = &req.args;
        let config = self.repos.get(owner, repo).await.ok();
        let token = token
            .as_deref()
            .or_else(|| effective_token(req.user_token(), config.as_ref()));

        let pulls =
            github::list_open_pull_requests(self.github.as_ref(), owner, repo, token, self.per_page)
                .await?;
        for pull in &pulls {
            self.propagate(owner, repo, pull.number).await;
        }
        tracing::info!(owner = %owner, repo = %repo, pull_requests = pulls.len(), "Pull requests validated");
        Ok(ValidationSummary {
            pull_requests: pulls.len(),
        })
    }
}

enum UploadOutcome {
    Signed,
    Skipped,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cla::testing::{
        MockGitHub, MockRepos, MockStore, RecordingComments, RecordingStatus, signature,
    };

    const GIST_URL: &str = "https://gist.github.com/octocat/g";

    struct Harness {
        orchestrator: ClaOrchestrator,
        github: Arc<MockGitHub>,
        store: Arc<MockStore>,
        status: Arc<RecordingStatus>,
        comments: Arc<RecordingComments>,
    }

    fn harness(github: MockGitHub, store: MockStore, repos: MockRepos) -> Harness {
        let github = Arc::new(github);
        let store = Arc::new(store);
        let status = Arc::new(RecordingStatus::default());
        let comments = Arc::new(RecordingComments::default());
        let orchestrator = ClaOrchestrator::new(
            github.clone(),
            Arc::new(repos),
            store.clone(),
            status.clone(),
            comments.clone(),
        );
        Harness {
            orchestrator,
            github,
            store,
            status,
            comments,
        }
    }

    fn linked_repo(token: Option<&str>) -> MockRepos {
        MockRepos::with_repo(
            "octocat",
            "Hello-World",
            GistRef::new(GIST_URL, Some("v1".into())),
            token,
        )
    }

    /// Two open PRs: #1 by alice, #2 by bob. Markdown renders to fixed HTML.
    fn forge() -> MockGitHub {
        MockGitHub::new(|call| match &call.request {
            GitHubRequest::ListPullRequests { .. } => Ok(ApiResponse::ok(serde_json::json!([
                {"number": 1, "user": {"login": "alice", "id": 1}, "head": {"sha": "a1"}},
                {"number": 2, "user": {"login": "bob", "id": 2}, "head": {"sha": "b2"}}
            ]))),
            GitHubRequest::RenderMarkdown { .. } => {
                Ok(ApiResponse::ok(serde_json::json!("<h1>Agreement</h1>")))
            }
            GitHubRequest::GetUser { login } if login == "ghost" => {
                Err(CallError::new("Not Found"))
            }
            GitHubRequest::GetUser { login } => Ok(ApiResponse::ok(
                serde_json::json!({"login": login, "id": login.len()}),
            )),
            other => panic!("unexpected call {:?}", other),
        })
    }

    fn render_only(
        respond: impl Fn() -> Result<ApiResponse, CallError> + Send + Sync + 'static,
    ) -> MockGitHub {
        MockGitHub::new(move |call| match &call.request {
            GitHubRequest::RenderMarkdown { .. } => respond(),
            other => panic!("unexpected call {:?}", other),
        })
    }

    fn user(login: &str, id: i64, token: Option<&str>) -> AuthUser {
        AuthUser {
            login: login.into(),
            id,
            token: token.map(str::to_string),
        }
    }

    fn repo_args() -> RepoArgs {
        RepoArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
        }
    }

    fn gist_args(gist: Option<GistRef>) -> GistArgs {
        GistArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            gist,
        }
    }

    // ── get ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_resolves_linked_gist_before_rendering() {
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        let rendered = h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap();
        assert_eq!(rendered.raw, "<h1>Agreement</h1>");

        let gist_calls = h.store.gist_calls.lock().unwrap().clone();
        assert_eq!(gist_calls.len(), 1);
        assert_eq!(gist_calls[0].gist, GistRef::new(GIST_URL, Some("v1".into())));

        let renders = h.github.calls_to("markdown", "render");
        assert_eq!(renders.len(), 1);
        assert_eq!(
            renders[0].request,
            GitHubRequest::RenderMarkdown {
                text: "# Agreement".into(),
                context: None,
            }
        );
    }

    #[tokio::test]
    async fn test_get_token_precedence() {
        // Caller token wins.
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        h.orchestrator
            .get(Request::from_user(user("alice", 1, Some("ghu_user")), gist_args(None)))
            .await
            .unwrap();
        assert!(h.github.called_with_token("markdown", "render", Some("ghu_user")));
        assert_eq!(
            h.store.gist_calls.lock().unwrap()[0].token.as_deref(),
            Some("ghu_user")
        );

        // Repository token next.
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap();
        assert!(h.github.called_with_token("markdown", "render", Some("ghp_repo")));

        // Otherwise anonymous.
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap();
        assert!(h.github.called_with_token("markdown", "render", None));
    }

    #[tokio::test]
    async fn test_get_prefers_explicit_gist() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let explicit = GistRef::new("https://gist.github.com/octocat/other", Some("v9".into()));
        h.orchestrator
            .get(Request::anonymous(gist_args(Some(explicit.clone()))))
            .await
            .unwrap();
        assert_eq!(h.store.gist_calls.lock().unwrap()[0].gist, explicit);
    }

    #[tokio::test]
    async fn test_get_unlinked_repo_without_gist_is_not_found() {
        let h = harness(forge(), MockStore::default(), MockRepos::default());
        let err = h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap_err();
        assert!(matches!(err, ClaError::NotFound(_)));
        assert_eq!(h.github.count("markdown", "render"), 0);
    }

    #[tokio::test]
    async fn test_get_unlinked_repo_with_gist_proceeds() {
        let h = harness(forge(), MockStore::default(), MockRepos::default());
        let gist = GistRef::new(GIST_URL, None);
        let rendered = h.orchestrator.get(Request::anonymous(gist_args(Some(gist)))).await;
        assert!(rendered.is_ok());
    }

    #[tokio::test]
    async fn test_get_render_error_message_is_surfaced() {
        let github = render_only(|| {
            Ok(ApiResponse::new(500, serde_json::json!({"message": "revoked"})))
        });
        let h = harness(github, MockStore::default(), linked_repo(None));
        let err = h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap_err();
        assert!(matches!(err, ClaError::Render(_)));
        assert_eq!(err.to_string(), "revoked");
    }

    #[tokio::test]
    async fn test_get_call_error_ignored_on_status_200() {
        let github = render_only(|| {
            Err(CallError::with_response(
                "socket hang up",
                ApiResponse::new(200, serde_json::json!({})),
            ))
        });
        let h = harness(github, MockStore::default(), linked_repo(None));
        let rendered = h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap();
        assert_eq!(rendered.raw, "");
    }

    #[tokio::test]
    async fn test_get_non_success_without_message_is_render_error() {
        let github = render_only(|| Ok(ApiResponse::new(502, serde_json::Value::Null)));
        let h = harness(github, MockStore::default(), linked_repo(None));
        let err = h.orchestrator.get(Request::anonymous(gist_args(None))).await.unwrap_err();
        assert_eq!(err.to_string(), "Markdown render returned status 502");
    }

    #[test]
    fn test_interpret_render_call_error_without_response() {
        let err = interpret_render(Err(CallError::new("connection refused"))).unwrap_err();
        assert_eq!(err.to_string(), "connection refused");

        let err = interpret_render(Err(CallError::with_response(
            "GitHub returned status 401",
            ApiResponse::new(401, serde_json::json!({"message": "Bad credentials"})),
        )))
        .unwrap_err();
        assert_eq!(err.to_string(), "Bad credentials");
    }

    // ── sign ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sign_requires_user() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let err = h.orchestrator.sign(Request::anonymous(repo_args())).await.unwrap_err();
        assert!(matches!(err, ClaError::Unauthenticated));
        assert_eq!(h.store.sign_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_passes_caller_identity_to_store() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        h.orchestrator
            .sign(Request::from_user(user("user", 3, None), repo_args()))
            .await
            .unwrap();
        assert_eq!(
            h.store.sign_calls.lock().unwrap()[0],
            SignQuery {
                owner: "octocat".into(),
                repo: "Hello-World".into(),
                user: "user".into(),
                user_id: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_sign_updates_only_signers_pull_requests() {
        let store = MockStore::default().with_check(CheckResult {
            signed: true,
            user_map: Some(UserMap {
                signed: vec!["alice".into()],
                not_signed: vec![],
            }),
        });
        let h = harness(forge(), store, linked_repo(Some("ghp_repo")));
        let signature = h
            .orchestrator
            .sign(Request::from_user(user("alice", 1, None), repo_args()))
            .await
            .unwrap();
        assert_eq!(signature.user, "alice");

        assert_eq!(
            h.status.updates(),
            vec![StatusUpdate {
                owner: "octocat".into(),
                repo: "Hello-World".into(),
                number: 1,
                signed: true,
            }]
        );
        let edits = h.comments.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].number, 1);
        assert_eq!(
            edits[0].user_map.as_ref().map(|m| m.signed.clone()),
            Some(vec!["alice".to_string()])
        );
        assert!(h.github.called_with_token("pullRequests", "getAll", Some("ghp_repo")));
    }

    #[tokio::test]
    async fn test_sign_without_breakdown_edits_no_comment() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        h.orchestrator
            .sign(Request::from_user(user("bob", 2, None), repo_args()))
            .await
            .unwrap();
        assert_eq!(h.status.updates().len(), 1);
        assert!(h.comments.edits().is_empty());
    }

    #[tokio::test]
    async fn test_sign_with_no_open_pull_requests() {
        let github = MockGitHub::new(|call| match &call.request {
            GitHubRequest::ListPullRequests { .. } => Ok(ApiResponse::ok(serde_json::json!([]))),
            other => panic!("unexpected call {:?}", other),
        });
        let h = harness(github, MockStore::default(), linked_repo(None));
        let result = h
            .orchestrator
            .sign(Request::from_user(user("alice", 1, None), repo_args()))
            .await;
        assert!(result.is_ok());
        assert_eq!(h.github.count("pullRequests", "getAll"), 1);
        assert!(h.status.updates().is_empty());
    }

    #[tokio::test]
    async fn test_sign_store_failure_is_sign_error() {
        let h = harness(forge(), MockStore::default().failing_sign("disk full"), linked_repo(None));
        let err = h
            .orchestrator
            .sign(Request::from_user(user("alice", 1, None), repo_args()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaError::Sign(_)));
        assert_eq!(h.github.count("pullRequests", "getAll"), 0);
        assert!(h.status.updates().is_empty());
    }

    #[tokio::test]
    async fn test_sign_survives_listing_failure() {
        let github = MockGitHub::new(|_| Err(CallError::new("rate limited")));
        let h = harness(github, MockStore::default(), linked_repo(None));
        let result = h
            .orchestrator
            .sign(Request::from_user(user("alice", 1, None), repo_args()))
            .await;
        assert!(result.is_ok());
        assert!(h.status.updates().is_empty());
    }

    #[tokio::test]
    async fn test_sign_uses_caller_token_for_listing() {
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        h.orchestrator
            .sign(Request::from_user(user("alice", 1, Some("ghu_user")), repo_args()))
            .await
            .unwrap();
        assert!(h.github.called_with_token("pullRequests", "getAll", Some("ghu_user")));
    }

    // ── check ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_check_defaults_to_caller_login() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let args = CheckArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            user: None,
            gist: None,
            number: None,
        };
        let result = h
            .orchestrator
            .check(Request::from_user(user("alice", 1, None), args))
            .await
            .unwrap();
        assert!(result.signed);
        assert_eq!(
            h.store.check_calls.lock().unwrap()[0].user.as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_check_store_failure_is_check_error() {
        let h = harness(forge(), MockStore::default().failing_check("locked"), linked_repo(None));
        let args = CheckArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            user: Some("alice".into()),
            gist: None,
            number: None,
        };
        let err = h.orchestrator.check(Request::anonymous(args)).await.unwrap_err();
        assert!(matches!(err, ClaError::Check(_)));
    }

    // ── getAll / countCLA ────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_all_uses_linked_gist() {
        let store = MockStore::default().with_signatures(vec![signature("alice", 1, "v1")]);
        let h = harness(forge(), store, linked_repo(None));
        let all = h.orchestrator.get_all(Request::anonymous(gist_args(None))).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            h.store.all_calls.lock().unwrap()[0].gist,
            GistRef::new(GIST_URL, Some("v1".into()))
        );
    }

    #[tokio::test]
    async fn test_get_all_unlinked_is_not_found() {
        let h = harness(forge(), MockStore::default(), MockRepos::default());
        let err = h.orchestrator.get_all(Request::anonymous(gist_args(None))).await.unwrap_err();
        assert!(matches!(err, ClaError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_count_backfills_version_from_repository() {
        let store = MockStore::default().with_signatures(vec![
            signature("alice", 1, "v1"),
            signature("bob", 2, "v1"),
            signature("carol", 3, "v1"),
        ]);
        let h = harness(forge(), store, linked_repo(None));
        let count = h
            .orchestrator
            .count_cla(Request::anonymous(gist_args(Some(GistRef::new(GIST_URL, None)))))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            h.store.all_calls.lock().unwrap()[0].gist,
            GistRef::new(GIST_URL, Some("v1".into()))
        );
        assert!(h.store.gist_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_fetches_version_for_foreign_gist() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let other = GistRef::new("https://gist.github.com/octocat/other", None);
        let count = h
            .orchestrator
            .count_cla(Request::anonymous(gist_args(Some(other))))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            h.store.all_calls.lock().unwrap()[0].gist.version.as_deref(),
            Some("v-latest")
        );
    }

    // ── getLastSignature / getSignedCLA ──────────────────────────────

    #[tokio::test]
    async fn test_get_last_signature_uses_linked_gist_url() {
        let store = MockStore::default().with_signatures(vec![signature("user", 3, "v1")]);
        let h = harness(forge(), store, linked_repo(None));
        let last = h
            .orchestrator
            .get_last_signature(Request::from_user(user("user", 3, None), repo_args()))
            .await
            .unwrap();
        assert!(last.is_some());
        assert_eq!(
            h.store.last_calls.lock().unwrap()[0],
            LastSignatureQuery {
                owner: "octocat".into(),
                repo: "Hello-World".into(),
                user: "user".into(),
                gist_url: GIST_URL.into(),
            }
        );
    }

    #[tokio::test]
    async fn test_get_signed_cla_for_caller() {
        let store = MockStore::default().with_signatures(vec![
            signature("user", 3, "v1"),
            signature("other", 4, "v1"),
        ]);
        let h = harness(forge(), store, linked_repo(None));
        let signed = h
            .orchestrator
            .get_signed_cla(Request::from_user(user("user", 3, None), SignedClaArgs { user: None }))
            .await
            .unwrap();
        assert_eq!(signed.len(), 1);
        assert_eq!(*h.store.signed_cla_calls.lock().unwrap(), vec!["user".to_string()]);

        let err = h
            .orchestrator
            .get_signed_cla(Request::anonymous(SignedClaArgs { user: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaError::Unauthenticated));
    }

    // ── upload ───────────────────────────────────────────────────────

    fn upload_args(users: Option<Vec<&str>>) -> UploadArgs {
        UploadArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            users: users.map(|u| u.into_iter().map(str::to_string).collect()),
        }
    }

    #[tokio::test]
    async fn test_upload_empty_or_absent_is_noop() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let caller = user("admin", 9, Some("ghu_admin"));

        let none = h
            .orchestrator
            .upload(Request::from_user(caller.clone(), upload_args(None)))
            .await
            .unwrap();
        assert!(none.is_none());

        let empty = h
            .orchestrator
            .upload(Request::from_user(caller, upload_args(Some(vec![]))))
            .await
            .unwrap();
        assert!(empty.is_none());
        assert_eq!(h.store.sign_count(), 0);
        assert!(h.github.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upload_signs_resolved_users() {
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        let report = h
            .orchestrator
            .upload(Request::from_user(
                user("admin", 9, Some("ghu_admin")),
                upload_args(Some(vec!["one", "three"])),
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.signed, vec!["one".to_string(), "three".to_string()]);
        assert!(report.skipped.is_empty());

        let signs = h.store.sign_calls.lock().unwrap().clone();
        assert_eq!(signs.len(), 2);
        assert!(signs.contains(&SignQuery {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            user: "three".into(),
            user_id: 5,
        }));
        assert!(h.github.called_with_token("users", "getFrom", Some("ghu_admin")));
    }

    #[tokio::test]
    async fn test_upload_skips_unresolved_users() {
        let h = harness(forge(), MockStore::default(), linked_repo(None));
        let report = h
            .orchestrator
            .upload(Request::anonymous(upload_args(Some(vec!["ghost", "one"]))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.skipped, vec!["ghost".to_string()]);
        assert_eq!(report.signed, vec!["one".to_string()]);
        assert_eq!(h.store.sign_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_reports_store_failures() {
        let h = harness(forge(), MockStore::default().failing_sign("disk full"), linked_repo(None));
        let report = h
            .orchestrator
            .upload(Request::anonymous(upload_args(Some(vec!["one"]))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.failed, vec!["one".to_string()]);
    }

    // ── validatePullRequests ─────────────────────────────────────────

    fn validate_args(token: Option<&str>) -> ValidateArgs {
        ValidateArgs {
            owner: "octocat".into(),
            repo: "Hello-World".into(),
            token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_validate_updates_every_open_pull_request() {
        let store = MockStore::default().with_check(CheckResult {
            signed: false,
            user_map: Some(UserMap::default()),
        });
        let h = harness(forge(), store, linked_repo(Some("ghp_repo")));
        let summary = h
            .orchestrator
            .validate_pull_requests(Request::anonymous(validate_args(Some("test_token"))))
            .await
            .unwrap();
        assert_eq!(summary.pull_requests, 2);

        let numbers: Vec<u64> = h.status.updates().iter().map(|u| u.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(h.status.updates().iter().all(|u| !u.signed));
        assert_eq!(h.comments.edits().len(), 2);
        assert!(h.github.called_with_token("pullRequests", "getAll", Some("test_token")));
    }

    #[tokio::test]
    async fn test_validate_falls_back_to_user_then_repo_token() {
        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        h.orchestrator
            .validate_pull_requests(Request::from_user(
                user("admin", 9, Some("user_token")),
                validate_args(None),
            ))
            .await
            .unwrap();
        assert!(h.github.called_with_token("pullRequests", "getAll", Some("user_token")));

        let h = harness(forge(), MockStore::default(), linked_repo(Some("ghp_repo")));
        h.orchestrator
            .validate_pull_requests(Request::anonymous(validate_args(None)))
            .await
            .unwrap();
        assert!(h.github.called_with_token("pullRequests", "getAll", Some("ghp_repo")));
    }

    #[tokio::test]
    async fn test_validate_loads_all_pages() {
        let github = MockGitHub::new(|call| match &call.request {
            GitHubRequest::ListPullRequests { page, .. } => {
                let number = *page as u64;
                let resp = ApiResponse::ok(serde_json::json!([
                    {"number": number, "user": {"login": "x", "id": 1}}
                ]));
                Ok(resp.with_next_page(*page < 3))
            }
            other => panic!("unexpected call {:?}", other),
        });
        let h = harness(github, MockStore::default(), linked_repo(None));
        let summary = h
            .orchestrator
            .validate_pull_requests(Request::anonymous(validate_args(None)))
            .await
            .unwrap();
        assert_eq!(summary.pull_requests, 3);
        assert_eq!(h.github.count("pullRequests", "getAll"), 3);
        assert_eq!(h.status.updates().len(), 3);
    }

    #[tokio::test]
    async fn test_validate_skips_pull_requests_whose_check_fails() {
        let h = harness(forge(), MockStore::default().failing_check("locked"), linked_repo(None));
        let summary = h
            .orchestrator
            .validate_pull_requests(Request::anonymous(validate_args(None)))
            .await
            .unwrap();
        assert_eq!(summary.pull_requests, 2);
        assert!(h.status.updates().is_empty());
    }

    #[tokio::test]
    async fn test_validate_listing_failure_is_surfaced() {
        let github = MockGitHub::new(|_| Err(CallError::new("Bad credentials")));
        let h = harness(github, MockStore::default(), linked_repo(None));
        let err = h
            .orchestrator
            .validate_pull_requests(Request::anonymous(validate_args(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaError::GitHub(_)));
    }

    #[test]
    fn test_effective_token_precedence() {
        let repo = RepoConfig {
            owner: "o".into(),
            repo: "r".into(),
            gist: GistRef::new(GIST_URL, None),
            token: Some("repo".into()),
            created_at: String::new(),
        };
        assert_eq!(effective_token(Some("user"), Some(&repo)), Some("user"));
        assert_eq!(effective_token(None, Some(&repo)), Some("repo"));
        assert_eq!(effective_token(None, None), None);
    }
}
