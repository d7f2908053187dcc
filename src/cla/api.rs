use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::github::{self, GitHubApi};
use super::models::*;
use super::orchestrator::ClaOrchestrator;
use super::store::RepoDirectory;
use crate::errors::ClaError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: ClaOrchestrator,
    pub repos: Arc<dyn RepoDirectory>,
    pub github: Arc<dyn GitHubApi>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Optional gist override carried in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct GistParams {
    pub gist_url: Option<String>,
    pub gist_version: Option<String>,
}

impl GistParams {
    fn gist(self) -> Option<GistRef> {
        self.gist_url.map(|url| GistRef::new(url, self.gist_version))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckParams {
    pub user: Option<String>,
    pub number: Option<u64>,
    pub gist_url: Option<String>,
    pub gist_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub users: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateRequest {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkRepoRequest {
    pub owner: String,
    pub repo: String,
    pub gist_url: String,
    pub gist_version: Option<String>,
    pub token: Option<String>,
}

#[derive(serde::Serialize)]
pub struct CountResponse {
    pub count: usize,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ClaError> for ApiError {
    fn from(err: ClaError) -> Self {
        let msg = err.to_string();
        match err {
            ClaError::NotFound(_) => ApiError::NotFound(msg),
            ClaError::BadRequest(_) => ApiError::BadRequest(msg),
            ClaError::Unauthenticated => ApiError::Unauthorized(msg),
            ClaError::GitHub(_) | ClaError::Render(_) => ApiError::BadGateway(msg),
            ClaError::Sign(_) | ClaError::Check(_) | ClaError::Store(_) => {
                tracing::error!(error = %msg, "Request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

// ── Caller resolution ─────────────────────────────────────────────────

/// The caller identified by an `Authorization: Bearer` token, if any.
///
/// No header means an anonymous request. A token the forge rejects is a 401.
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequestParts<SharedState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(MaybeUser(None));
        };
        let token = header
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Malformed Authorization header".into()))?
            .to_string();

        let user = github::get_authenticated_user(state.github.as_ref(), &token)
            .await
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;
        Ok(MaybeUser(Some(AuthUser {
            login: user.login,
            id: user.id,
            token: Some(token),
        })))
    }
}

fn request<A>(user: MaybeUser, args: A) -> Request<A> {
    Request {
        user: user.0,
        args,
    }
}

/// Fails unless the caller administers `owner/repo` on the forge.
async fn require_admin<'a>(
    state: &SharedState,
    user: &'a MaybeUser,
    owner: &str,
    repo: &str,
) -> Result<&'a AuthUser, ApiError> {
    let caller = user
        .0
        .as_ref()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;
    let token = caller
        .token
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;
    let admin = github::user_is_admin(state.github.as_ref(), owner, repo, token)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;
    if !admin {
        return Err(ApiError::Forbidden(format!(
            "{} is not an admin of {}/{}",
            caller.login, owner, repo
        )));
    }
    Ok(caller)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/cla/{owner}/{repo}", get(get_cla))
        .route("/api/cla/{owner}/{repo}/gist", get(get_gist))
        .route("/api/cla/{owner}/{repo}/sign", post(sign_cla))
        .route("/api/cla/{owner}/{repo}/check", get(check_cla))
        .route("/api/cla/{owner}/{repo}/signatures", get(list_signatures))
        .route("/api/cla/{owner}/{repo}/count", get(count_signatures))
        .route("/api/cla/{owner}/{repo}/last-signature", get(last_signature))
        .route("/api/cla/{owner}/{repo}/upload", post(upload_signatures))
        .route("/api/cla/{owner}/{repo}/validate", post(validate_pull_requests))
        .route("/api/signatures", get(my_signatures))
        .route("/api/users/{user}/signatures", get(user_signatures))
        .route("/api/repos", post(link_repo))
        .route("/api/repos/{owner}/{repo}", get(get_repo).delete(unlink_repo))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_cla(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<GistParams>,
) -> Result<impl IntoResponse, ApiError> {
    let args = GistArgs {
        owner,
        repo,
        gist: params.gist(),
    };
    let rendered = state.orchestrator.get(request(user, args)).await?;
    Ok(Json(rendered))
}

async fn get_gist(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<GistParams>,
) -> Result<impl IntoResponse, ApiError> {
    let args = GistArgs {
        owner,
        repo,
        gist: params.gist(),
    };
    let gist = state.orchestrator.get_gist(request(user, args)).await?;
    Ok(Json(gist))
}

async fn sign_cla(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let signature = state
        .orchestrator
        .sign(request(user, RepoArgs { owner, repo }))
        .await?;
    Ok((StatusCode::CREATED, Json(signature)))
}

async fn check_cla(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<CheckParams>,
) -> Result<impl IntoResponse, ApiError> {
    let args = CheckArgs {
        owner,
        repo,
        user: params.user,
        gist: params
            .gist_url
            .map(|url| GistRef::new(url, params.gist_version)),
        number: params.number,
    };
    let result = state.orchestrator.check(request(user, args)).await?;
    Ok(Json(result))
}

async fn list_signatures(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<GistParams>,
) -> Result<impl IntoResponse, ApiError> {
    let args = GistArgs {
        owner,
        repo,
        gist: params.gist(),
    };
    let signatures = state.orchestrator.get_all(request(user, args)).await?;
    Ok(Json(signatures))
}

async fn count_signatures(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<GistParams>,
) -> Result<impl IntoResponse, ApiError> {
    let args = GistArgs {
        owner,
        repo,
        gist: params.gist(),
    };
    let count = state.orchestrator.count_cla(request(user, args)).await?;
    Ok(Json(CountResponse { count }))
}

async fn last_signature(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let signature = state
        .orchestrator
        .get_last_signature(request(user, RepoArgs { owner, repo }))
        .await?;
    Ok(Json(signature))
}

async fn upload_signatures(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    Json(req): Json<UploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &user, &owner, &repo).await?;
    let args = UploadArgs {
        owner,
        repo,
        users: req.users,
    };
    let report = state.orchestrator.upload(request(user, args)).await?;
    Ok(Json(report))
}

async fn validate_pull_requests(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
    body: Option<Json<ValidateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &user, &owner, &repo).await?;
    let token = body.and_then(|Json(b)| b.token);
    let summary = state
        .orchestrator
        .validate_pull_requests(request(user, ValidateArgs { owner, repo, token }))
        .await?;
    Ok(Json(summary))
}

async fn my_signatures(
    State(state): State<SharedState>,
    user: MaybeUser,
) -> Result<impl IntoResponse, ApiError> {
    let signatures = state
        .orchestrator
        .get_signed_cla(request(user, SignedClaArgs { user: None }))
        .await?;
    Ok(Json(signatures))
}

async fn user_signatures(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path(login): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let signatures = state
        .orchestrator
        .get_signed_cla(request(user, SignedClaArgs { user: Some(login) }))
        .await?;
    Ok(Json(signatures))
}

async fn link_repo(
    State(state): State<SharedState>,
    user: MaybeUser,
    Json(req): Json<LinkRepoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_admin(&state, &user, &req.owner, &req.repo).await?;
    let token = req.token.or_else(|| caller.token.clone());
    if let Some(token) = &token
        && !github::is_valid_github_token(token)
    {
        return Err(ApiError::BadRequest("Token does not look like a GitHub token".into()));
    }
    if GistRef::new(req.gist_url.as_str(), None).id().is_none() {
        return Err(ApiError::BadRequest(format!("Invalid gist url {}", req.gist_url)));
    }

    let linked = state
        .repos
        .link(LinkRepo {
            owner: req.owner,
            repo: req.repo,
            gist: GistRef::new(req.gist_url, req.gist_version),
            token,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(linked)))
}

async fn get_repo(
    State(state): State<SharedState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.repos.get(&owner, &repo).await?;
    Ok(Json(config))
}

async fn unlink_repo(
    State(state): State<SharedState>,
    user: MaybeUser,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &user, &owner, &repo).await?;
    if state.repos.unlink(&owner, &repo).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Repository {}/{} is not linked", owner, repo)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
