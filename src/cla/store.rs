//! Repository directory and CLA record store.
//!
//! Both are ports consumed by the orchestrator. The SQLite-backed
//! implementations live here too: `RepoStore` for repository links and
//! `ClaRecords` for signatures, which also asks the forge for the current
//! gist revision and for the committers of a pull request.

use std::sync::Arc;

use async_trait::async_trait;

use super::db::DbHandle;
use super::github::{self, GitHubApi};
use super::models::*;
use crate::errors::ClaError;

/// Maps (owner, repo) to its stored configuration.
#[async_trait]
pub trait RepoDirectory: Send + Sync {
    /// Fails with `ClaError::NotFound` when the repository is not linked.
    async fn get(&self, owner: &str, repo: &str) -> Result<RepoConfig, ClaError>;

    async fn link(&self, link: LinkRepo) -> Result<RepoConfig, ClaError>;

    /// Returns false when there was nothing to unlink.
    async fn unlink(&self, owner: &str, repo: &str) -> Result<bool, ClaError>;
}

/// Signature bookkeeping plus gist retrieval.
#[async_trait]
pub trait ClaStore: Send + Sync {
    async fn sign(&self, query: SignQuery) -> Result<Signature, ClaError>;

    async fn check(&self, query: CheckQuery) -> Result<CheckResult, ClaError>;

    async fn get_all(&self, query: AllQuery) -> Result<Vec<Signature>, ClaError>;

    async fn get_last_signature(
        &self,
        query: LastSignatureQuery,
    ) -> Result<Option<Signature>, ClaError>;

    async fn get_signed_cla(&self, user: &str) -> Result<Vec<Signature>, ClaError>;

    async fn get_gist(&self, query: GistQuery) -> Result<Gist, ClaError>;
}

// ── RepoStore ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RepoStore {
    db: DbHandle,
}

impl RepoStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RepoDirectory for RepoStore {
    async fn get(&self, owner: &str, repo: &str) -> Result<RepoConfig, ClaError> {
        find_repo(&self.db, owner, repo).await
    }

    async fn link(&self, link: LinkRepo) -> Result<RepoConfig, ClaError> {
        let linked = self
            .db
            .call(move |db| {
                db.upsert_repo(&link.owner, &link.repo, &link.gist, link.token.as_deref())
            })
            .await
            .map_err(ClaError::Store)?;
        tracing::info!(owner = %linked.owner, repo = %linked.repo, gist = %linked.gist.url, "Repository linked");
        Ok(linked)
    }

    async fn unlink(&self, owner: &str, repo: &str) -> Result<bool, ClaError> {
        let (o, r) = (owner.to_string(), repo.to_string());
        let removed = self
            .db
            .call(move |db| db.delete_repo(&o, &r))
            .await
            .map_err(ClaError::Store)?;
        if removed {
            tracing::info!(owner, repo, "Repository unlinked");
        }
        Ok(removed)
    }
}

async fn find_repo(db: &DbHandle, owner: &str, repo: &str) -> Result<RepoConfig, ClaError> {
    let (o, r) = (owner.to_string(), repo.to_string());
    db.call(move |db| db.get_repo(&o, &r))
        .await
        .map_err(ClaError::Store)?
        .ok_or_else(|| ClaError::NotFound(format!("Repository {}/{} is not linked", owner, repo)))
}

// ── ClaRecords ────────────────────────────────────────────────────────

pub struct ClaRecords {
    db: DbHandle,
    github: Arc<dyn GitHubApi>,
}

impl ClaRecords {
    pub fn new(db: DbHandle, github: Arc<dyn GitHubApi>) -> Self {
        Self { db, github }
    }

    /// Complete gist reference to check or sign against.
    ///
    /// An explicit reference wins over the linked one. A missing version is
    /// taken from the repository when the urls agree, otherwise from the
    /// newest revision on the forge.
    async fn current_gist(
        &self,
        repo: &RepoConfig,
        explicit: Option<GistRef>,
    ) -> Result<GistRef, ClaError> {
        let mut gist = explicit.unwrap_or_else(|| repo.gist.clone());
        if gist.version.is_some() {
            return Ok(gist);
        }
        if gist.url == repo.gist.url && repo.gist.version.is_some() {
            gist.version = repo.gist.version.clone();
            return Ok(gist);
        }

        let id = gist
            .id()
            .ok_or_else(|| ClaError::NotFound(format!("Invalid gist url {}", gist.url)))?
            .to_string();
        let fetched = github::get_gist(self.github.as_ref(), &id, None, repo.token.as_deref()).await?;
        gist.version = Some(
            fetched
                .current_version()
                .ok_or_else(|| ClaError::NotFound(format!("Gist {} has no revisions", gist.url)))?
                .to_string(),
        );
        Ok(gist)
    }

    async fn has_signed(
        &self,
        owner: &str,
        repo: &str,
        user: &str,
        gist: &GistRef,
    ) -> Result<bool, ClaError> {
        let (o, r, u, g) = (owner.to_string(), repo.to_string(), user.to_string(), gist.clone());
        let found = self
            .db
            .call(move |db| db.find_signature(&o, &r, &u, &g))
            .await
            .map_err(ClaError::Store)?;
        Ok(found.is_some())
    }

    async fn check_pull_request(
        &self,
        repo: &RepoConfig,
        gist: &GistRef,
        number: u64,
    ) -> Result<CheckResult, ClaError> {
        let committers = github::list_committers(
            self.github.as_ref(),
            &repo.owner,
            &repo.repo,
            number,
            repo.token.as_deref(),
        )
        .await?;

        let mut user_map = UserMap::default();
        for committer in committers {
            if self.has_signed(&repo.owner, &repo.repo, &committer, gist).await? {
                user_map.signed.push(committer);
            } else {
                user_map.not_signed.push(committer);
            }
        }

        Ok(CheckResult {
            signed: !user_map.signed.is_empty() && user_map.not_signed.is_empty(),
            user_map: Some(user_map),
        })
    }
}

#[async_trait]
impl ClaStore for ClaRecords {
    async fn sign(&self, query: SignQuery) -> Result<Signature, ClaError> {
        let repo = find_repo(&self.db, &query.owner, &query.repo).await?;
        let gist = self.current_gist(&repo, None).await?;
        let signature = self
            .db
            .call(move |db| {
                db.insert_signature(&query.owner, &query.repo, &query.user, query.user_id, &gist)
            })
            .await
            .map_err(ClaError::Store)?;
        tracing::info!(
            owner = %signature.owner,
            repo = %signature.repo,
            user = %signature.user,
            gist_version = %signature.gist_version,
            "CLA signed"
        );
        Ok(signature)
    }

    async fn check(&self, query: CheckQuery) -> Result<CheckResult, ClaError> {
        let repo = find_repo(&self.db, &query.owner, &query.repo).await?;
        let gist = self.current_gist(&repo, query.gist).await?;

        match (query.number, query.user) {
            (Some(number), _) => self.check_pull_request(&repo, &gist, number).await,
            (None, Some(user)) => Ok(CheckResult::signed(
                self.has_signed(&repo.owner, &repo.repo, &user, &gist).await?,
            )),
            (None, None) => Err(ClaError::BadRequest(
                "A user or a pull request number is required".into(),
            )),
        }
    }

    async fn get_all(&self, query: AllQuery) -> Result<Vec<Signature>, ClaError> {
        self.db
            .call(move |db| db.list_signatures(&query.owner, &query.repo, &query.gist))
            .await
            .map_err(ClaError::Store)
    }

    async fn get_last_signature(
        &self,
        query: LastSignatureQuery,
    ) -> Result<Option<Signature>, ClaError> {
        self.db
            .call(move |db| db.last_signature(&query.owner, &query.repo, &query.user, &query.gist_url))
            .await
            .map_err(ClaError::Store)
    }

    async fn get_signed_cla(&self, user: &str) -> Result<Vec<Signature>, ClaError> {
        let user = user.to_string();
        self.db
            .call(move |db| db.signatures_for_user(&user))
            .await
            .map_err(ClaError::Store)
    }

    async fn get_gist(&self, query: GistQuery) -> Result<Gist, ClaError> {
        let id = query
            .gist
            .id()
            .ok_or_else(|| ClaError::NotFound(format!("Invalid gist url {}", query.gist.url)))?;
        let gist = github::get_gist(
            self.github.as_ref(),
            id,
            query.gist.version.as_deref(),
            query.token.as_deref(),
        )
        .await?;
        Ok(gist)
    }
}
