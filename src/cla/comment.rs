//! Pull request summary comment.
//!
//! One comment per pull request, recognised by a hidden marker, lists which
//! committers have signed. It is edited in place on every check and only
//! created when somebody still has to sign.

use std::sync::Arc;

use super::github::{self, ApiCall, GitHubApi, GitHubRequest};
use super::models::{CommentEdit, UserMap};
use super::store::RepoDirectory;
use super::urls::ClaUrls;
use crate::errors::ClaError;

/// Hidden marker identifying the summary comment.
pub const COMMENT_MARKER: &str = "<!-- cla-assistant:summary -->";

/// Fire-and-forget sink for summary comment edits.
pub trait CommentDispatch: Send + Sync {
    fn edit_comment(&self, edit: CommentEdit);
}

#[derive(Clone)]
pub struct CommentService {
    repos: Arc<dyn RepoDirectory>,
    github: Arc<dyn GitHubApi>,
    urls: ClaUrls,
}

impl CommentService {
    pub fn new(repos: Arc<dyn RepoDirectory>, github: Arc<dyn GitHubApi>, urls: ClaUrls) -> Self {
        Self {
            repos,
            github,
            urls,
        }
    }

    pub fn render_body(&self, edit: &CommentEdit) -> String {
        let badge = self.urls.badge_url(edit.signed);
        let link = self.urls.cla_url(&edit.owner, &edit.repo, edit.number);
        let mut body = format!("{}\n[![CLA assistant check]({})]({})\n", COMMENT_MARKER, badge, link);

        if edit.signed {
            body.push_str("\nAll committers have signed the CLA.\n");
            return body;
        }

        body.push_str(&format!(
            "\nThank you for your submission! We ask that you [sign our Contributor License Agreement]({}) before we can accept your contribution.\n",
            link
        ));
        if let Some(UserMap { signed, not_signed }) = &edit.user_map {
            let total = signed.len() + not_signed.len();
            if total > 1 {
                body.push_str(&format!(
                    "\n**{}** out of **{}** committers have signed the CLA.\n\n",
                    signed.len(),
                    total
                ));
                for user in signed {
                    body.push_str(&format!(":white_check_mark: {}\n", user));
                }
                for user in not_signed {
                    body.push_str(&format!(":x: {}\n", user));
                }
            }
        }
        body
    }

    /// Edit the summary comment, creating it when the PR is not fully signed.
    pub async fn apply(&self, edit: &CommentEdit) -> Result<(), ClaError> {
        let token = self
            .repos
            .get(&edit.owner, &edit.repo)
            .await
            .ok()
            .and_then(|r| r.token);
        let token = token.as_deref();

        let comments =
            github::list_comments(self.github.as_ref(), &edit.owner, &edit.repo, edit.number, token)
                .await?;
        let existing = comments
            .into_iter()
            .find(|c| c.body.as_deref().is_some_and(|b| b.contains(COMMENT_MARKER)));

        let body = self.render_body(edit);
        let request = match existing {
            Some(comment) => GitHubRequest::EditComment {
                owner: edit.owner.clone(),
                repo: edit.repo.clone(),
                comment_id: comment.id,
                body,
            },
            None if !edit.signed => GitHubRequest::CreateComment {
                owner: edit.owner.clone(),
                repo: edit.repo.clone(),
                number: edit.number,
                body,
            },
            None => return Ok(()),
        };
        self.github.call(ApiCall::new(request, token)).await?;
        Ok(())
    }
}

impl CommentDispatch for CommentService {
    fn edit_comment(&self, edit: CommentEdit) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.apply(&edit).await {
                tracing::warn!(
                    owner = %edit.owner,
                    repo = %edit.repo,
                    number = edit.number,
                    error = %e,
                    "Failed to update CLA comment"
                );
            }
        });
    }
}
