//! Commit status propagation.
//!
//! Writes the `licence/cla` check onto a pull request's head commit. The
//! update is an annotation: every failure is logged and dropped.

use std::sync::Arc;

use super::github::{self, ApiCall, GitHubApi, GitHubRequest, STATUS_CONTEXT};
use super::models::{CommitState, StatusUpdate};
use super::store::RepoDirectory;
use super::urls::ClaUrls;

/// Fire-and-forget sink for status updates.
pub trait StatusDispatch: Send + Sync {
    fn dispatch(&self, update: StatusUpdate);
}

#[derive(Clone)]
pub struct StatusPropagator {
    repos: Arc<dyn RepoDirectory>,
    github: Arc<dyn GitHubApi>,
    urls: ClaUrls,
}

impl StatusPropagator {
    pub fn new(repos: Arc<dyn RepoDirectory>, github: Arc<dyn GitHubApi>, urls: ClaUrls) -> Self {
        Self {
            repos,
            github,
            urls,
        }
    }

    /// Set the status for one pull request and wait for the outcome.
    pub async fn update(&self, update: StatusUpdate) {
        let token = self
            .repos
            .get(&update.owner, &update.repo)
            .await
            .ok()
            .and_then(|r| r.token);

        let pull = match github::get_pull_request(
            self.github.as_ref(),
            &update.owner,
            &update.repo,
            update.number,
            token.as_deref(),
        )
        .await
        {
            Ok(pull) => pull,
            Err(e) => {
                tracing::debug!(owner = %update.owner, repo = %update.repo, number = update.number, error = %e, "Pull request lookup failed, skipping status");
                return;
            }
        };
        let Some(sha) = pull.head_sha else {
            return;
        };

        let state = CommitState::from_signed(update.signed);
        let request = GitHubRequest::CreateStatus {
            owner: update.owner.clone(),
            repo: update.repo.clone(),
            sha,
            state,
            description: state.description().to_string(),
            target_url: self.urls.cla_url(&update.owner, &update.repo, update.number),
            context: STATUS_CONTEXT.to_string(),
        };
        match self.github.call(ApiCall::new(request, token.as_deref())).await {
            Ok(_) => tracing::info!(
                owner = %update.owner,
                repo = %update.repo,
                number = update.number,
                state = state.as_str(),
                "Status updated"
            ),
            Err(e) => tracing::warn!(
                owner = %update.owner,
                repo = %update.repo,
                number = update.number,
                error = %e,
                "Error on Create Status, possible cause - wrong token, saved token does not have enough rights"
            ),
        }
    }
}

impl StatusDispatch for StatusPropagator {
    fn dispatch(&self, update: StatusUpdate) {
        let propagator = self.clone();
        tokio::spawn(async move { propagator.update(update).await });
    }
}
