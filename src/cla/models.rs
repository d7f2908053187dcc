use serde::{Deserialize, Serialize};

/// Pointer to one revision of the hosted CLA text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GistRef {
    #[serde(rename = "gist_url")]
    pub url: String,
    #[serde(rename = "gist_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl GistRef {
    pub fn new(url: impl Into<String>, version: Option<String>) -> Self {
        Self {
            url: url.into(),
            version,
        }
    }

    /// The gist id is the last path segment of the gist url.
    pub fn id(&self) -> Option<&str> {
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }
}

/// Stored configuration of a linked repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoConfig {
    pub owner: String,
    pub repo: String,
    pub gist: GistRef,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub created_at: String,
}

/// Payload for linking (or re-linking) a repository.
#[derive(Debug, Clone)]
pub struct LinkRepo {
    pub owner: String,
    pub repo: String,
    pub gist: GistRef,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signature {
    pub id: i64,
    pub owner: String,
    pub repo: String,
    pub user: String,
    pub user_id: i64,
    pub gist_url: String,
    pub gist_version: String,
    pub created_at: String,
}

/// An open pull request as seen during one request. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub author: String,
    pub head_sha: Option<String>,
}

/// Committers of a pull request split by signature state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserMap {
    pub signed: Vec<String>,
    pub not_signed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_map: Option<UserMap>,
}

impl CheckResult {
    pub fn signed(signed: bool) -> Self {
        Self {
            signed,
            user_map: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GistFile {
    pub filename: String,
    pub content: String,
}

/// The CLA document as fetched from the forge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gist {
    pub url: String,
    pub files: Vec<GistFile>,
    /// Revisions, newest first.
    pub history: Vec<String>,
}

impl Gist {
    pub fn current_version(&self) -> Option<&str> {
        self.history.first().map(String::as_str)
    }

    /// Text of the agreement: the first file that is not the metadata file.
    pub fn agreement_text(&self) -> &str {
        self.files
            .iter()
            .find(|f| f.filename != "metadata")
            .map(|f| f.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedCla {
    pub raw: String,
}

/// Outcome of a bulk upload. `skipped` holds logins the forge could not resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadReport {
    pub signed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSummary {
    pub pull_requests: usize,
}

// ── Request context ──────────────────────────────────────────────────

/// The caller of an operation, resolved from a bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub login: String,
    pub id: i64,
    pub token: Option<String>,
}

/// An operation invocation: who is asking and with which arguments.
#[derive(Debug, Clone)]
pub struct Request<A> {
    pub user: Option<AuthUser>,
    pub args: A,
}

impl<A> Request<A> {
    pub fn anonymous(args: A) -> Self {
        Self { user: None, args }
    }

    pub fn from_user(user: AuthUser, args: A) -> Self {
        Self {
            user: Some(user),
            args,
        }
    }

    pub fn user_token(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.token.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoArgs {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GistArgs {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub gist: Option<GistRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckArgs {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub gist: Option<GistRef>,
    #[serde(default)]
    pub number: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadArgs {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidateArgs {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedClaArgs {
    #[serde(default)]
    pub user: Option<String>,
}

// ── Store queries ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SignQuery {
    pub owner: String,
    pub repo: String,
    pub user: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckQuery {
    pub owner: String,
    pub repo: String,
    pub user: Option<String>,
    pub gist: Option<GistRef>,
    pub number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllQuery {
    pub owner: String,
    pub repo: String,
    pub gist: GistRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastSignatureQuery {
    pub owner: String,
    pub repo: String,
    pub user: String,
    pub gist_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GistQuery {
    pub gist: GistRef,
    pub token: Option<String>,
}

// ── Fan-out payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentEdit {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub signed: bool,
    pub user_map: Option<UserMap>,
}

/// Commit status state written to the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Success,
    Pending,
}

impl CommitState {
    pub fn from_signed(signed: bool) -> Self {
        if signed { Self::Success } else { Self::Pending }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "Contributor License Agreement is signed.",
            Self::Pending => "Contributor License Agreement is not signed yet.",
        }
    }
}
