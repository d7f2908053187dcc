/// Builds the public links embedded in statuses and comments.
#[derive(Debug, Clone)]
pub struct ClaUrls {
    base_url: String,
}

impl ClaUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Sign page for a repository.
    pub fn cla_page(&self, owner: &str, repo: &str) -> String {
        format!("{}/{}/{}", self.base_url, owner, repo)
    }

    /// Sign page linked from a pull request's status check.
    pub fn cla_url(&self, owner: &str, repo: &str, number: u64) -> String {
        format!("{}?pullRequest={}", self.cla_page(owner, repo), number)
    }

    pub fn badge_url(&self, signed: bool) -> String {
        let state = if signed { "signed" } else { "not_signed" };
        format!("{}/pull/badge/{}", self.base_url, state)
    }
}
