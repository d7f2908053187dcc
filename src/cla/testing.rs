//! Recording test doubles for the service ports.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::comment::CommentDispatch;
use super::github::{ApiCall, ApiResponse, GitHubApi};
use super::models::*;
use super::status::StatusDispatch;
use super::store::{ClaStore, RepoDirectory};
use crate::errors::{CallError, ClaError};

type Responder = Box<dyn Fn(&ApiCall) -> Result<ApiResponse, CallError> + Send + Sync>;

/// Forge double: answers every call through a closure and records it.
pub struct MockGitHub {
    responder: Responder,
    calls: Mutex<Vec<ApiCall>>,
}

impl MockGitHub {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ApiCall) -> Result<ApiResponse, CallError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, obj: &str, fun: &str) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.request.operation() == (obj, fun))
            .collect()
    }

    pub fn count(&self, obj: &str, fun: &str) -> usize {
        self.calls_to(obj, fun).len()
    }

    /// Whether every `(obj, fun)` call used `token`, and there was at least one.
    pub fn called_with_token(&self, obj: &str, fun: &str, token: Option<&str>) -> bool {
        let calls = self.calls_to(obj, fun);
        !calls.is_empty() && calls.iter().all(|c| c.token.as_deref() == token)
    }
}

#[async_trait]
impl GitHubApi for MockGitHub {
    async fn call(&self, call: ApiCall) -> Result<ApiResponse, CallError> {
        let result = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);
        result
    }
}

/// In-memory repository directory.
#[derive(Default)]
pub struct MockRepos {
    repos: Mutex<HashMap<(String, String), RepoConfig>>,
}

impl MockRepos {
    pub fn with_repo(owner: &str, repo: &str, gist: GistRef, token: Option<&str>) -> Self {
        let repos = Self::default();
        repos.insert(owner, repo, gist, token);
        repos
    }

    pub fn insert(&self, owner: &str, repo: &str, gist: GistRef, token: Option<&str>) {
        self.repos.lock().unwrap().insert(
            (owner.to_string(), repo.to_string()),
            RepoConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                gist,
                token: token.map(str::to_string),
                created_at: "2024-01-01T00:00:00.000Z".into(),
            },
        );
    }
}

#[async_trait]
impl RepoDirectory for MockRepos {
    async fn get(&self, owner: &str, repo: &str) -> Result<RepoConfig, ClaError> {
        self.repos
            .lock()
            .unwrap()
            .get(&(owner.to_string(), repo.to_string()))
            .cloned()
            .ok_or_else(|| ClaError::NotFound(format!("Repository {}/{} is not linked", owner, repo)))
    }

    async fn link(&self, link: LinkRepo) -> Result<RepoConfig, ClaError> {
        self.insert(&link.owner, &link.repo, link.gist.clone(), link.token.as_deref());
        self.get(&link.owner, &link.repo).await
    }

    async fn unlink(&self, owner: &str, repo: &str) -> Result<bool, ClaError> {
        Ok(self
            .repos
            .lock()
            .unwrap()
            .remove(&(owner.to_string(), repo.to_string()))
            .is_some())
    }
}

/// Record store double with canned results.
pub struct MockStore {
    check_result: CheckResult,
    signatures: Vec<Signature>,
    gist: Gist,
    fail_sign: Option<String>,
    fail_check: Option<String>,
    pub sign_calls: Mutex<Vec<SignQuery>>,
    pub check_calls: Mutex<Vec<CheckQuery>>,
    pub all_calls: Mutex<Vec<AllQuery>>,
    pub last_calls: Mutex<Vec<LastSignatureQuery>>,
    pub signed_cla_calls: Mutex<Vec<String>>,
    pub gist_calls: Mutex<Vec<GistQuery>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            check_result: CheckResult::signed(true),
            signatures: Vec::new(),
            gist: Gist {
                url: "https://gist.github.com/octocat/g".into(),
                files: vec![GistFile {
                    filename: "cla.md".into(),
                    content: "# Agreement".into(),
                }],
                history: vec!["v-latest".into()],
            },
            fail_sign: None,
            fail_check: None,
            sign_calls: Mutex::new(Vec::new()),
            check_calls: Mutex::new(Vec::new()),
            all_calls: Mutex::new(Vec::new()),
            last_calls: Mutex::new(Vec::new()),
            signed_cla_calls: Mutex::new(Vec::new()),
            gist_calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockStore {
    pub fn with_check(mut self, result: CheckResult) -> Self {
        self.check_result = result;
        self
    }

    pub fn with_signatures(mut self, signatures: Vec<Signature>) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn with_gist(mut self, gist: Gist) -> Self {
        self.gist = gist;
        self
    }

    pub fn failing_sign(mut self, message: &str) -> Self {
        self.fail_sign = Some(message.to_string());
        self
    }

    pub fn failing_check(mut self, message: &str) -> Self {
        self.fail_check = Some(message.to_string());
        self
    }

    pub fn sign_count(&self) -> usize {
        self.sign_calls.lock().unwrap().len()
    }
}

/// A signature record for tests.
pub fn signature(user: &str, user_id: i64, version: &str) -> Signature {
    Signature {
        id: user_id,
        owner: "octocat".into(),
        repo: "Hello-World".into(),
        user: user.into(),
        user_id,
        gist_url: "https://gist.github.com/octocat/g".into(),
        gist_version: version.into(),
        created_at: "2024-01-01T00:00:00.000Z".into(),
    }
}

#[async_trait]
impl ClaStore for MockStore {
    async fn sign(&self, query: SignQuery) -> Result<Signature, ClaError> {
        self.sign_calls.lock().unwrap().push(query.clone());
        if let Some(message) = &self.fail_sign {
            return Err(ClaError::Store(anyhow::anyhow!(message.clone())));
        }
        Ok(signature(&query.user, query.user_id, "v1"))
    }

    async fn check(&self, query: CheckQuery) -> Result<CheckResult, ClaError> {
        self.check_calls.lock().unwrap().push(query);
        if let Some(message) = &self.fail_check {
            return Err(ClaError::Store(anyhow::anyhow!(message.clone())));
        }
        Ok(self.check_result.clone())
    }

    async fn get_all(&self, query: AllQuery) -> Result<Vec<Signature>, ClaError> {
        self.all_calls.lock().unwrap().push(query);
        Ok(self.signatures.clone())
    }

    async fn get_last_signature(
        &self,
        query: LastSignatureQuery,
    ) -> Result<Option<Signature>, ClaError> {
        let found = self
            .signatures
            .iter()
            .rev()
            .find(|s| s.user == query.user)
            .cloned();
        self.last_calls.lock().unwrap().push(query);
        Ok(found)
    }

    async fn get_signed_cla(&self, user: &str) -> Result<Vec<Signature>, ClaError> {
        self.signed_cla_calls.lock().unwrap().push(user.to_string());
        Ok(self
            .signatures
            .iter()
            .filter(|s| s.user == user)
            .cloned()
            .collect())
    }

    async fn get_gist(&self, query: GistQuery) -> Result<Gist, ClaError> {
        self.gist_calls.lock().unwrap().push(query);
        Ok(self.gist.clone())
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatus {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl StatusDispatch for RecordingStatus {
    fn dispatch(&self, update: StatusUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
pub struct RecordingComments {
    edits: Mutex<Vec<CommentEdit>>,
}

impl RecordingComments {
    pub fn edits(&self) -> Vec<CommentEdit> {
        self.edits.lock().unwrap().clone()
    }
}

impl CommentDispatch for RecordingComments {
    fn edit_comment(&self, edit: CommentEdit) {
        self.edits.lock().unwrap().push(edit);
    }
}
