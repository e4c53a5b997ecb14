//! Authenticated GitHub client bound to one repository.

use octocrab::Octocrab;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("github api error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("missing github token")]
    MissingToken,

    #[error("missing repository coordinates (owner/repo)")]
    MissingCoordinates,

    #[error("environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unexpected response shape from {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// An octocrab client plus the owner/repo every route is scoped to. The
/// loop uses two of these when a separate reviewer identity is
/// configured, since a review from the PR author's own token is rejected
/// by the host.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    pub(crate) octocrab: Octocrab,
    pub(crate) owner: String,
    pub(crate) repo: String,
}

impl GitHubClient {
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(GitHubError::MissingToken);
        }
        let owner = owner.into();
        let repo = repo.into();
        if owner.is_empty() || repo.is_empty() {
            return Err(GitHubError::MissingCoordinates);
        }
        let octocrab = Octocrab::builder().personal_token(token).build()?;
        Ok(Self {
            octocrab,
            owner,
            repo,
        })
    }

    /// Build from `GITHUB_TOKEN`, `GITHUB_OWNER` and `GITHUB_REPO`.
    pub fn new_from_env() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").map_err(|_| GitHubError::MissingToken)?;
        let owner = std::env::var("GITHUB_OWNER")?;
        let repo = std::env::var("GITHUB_REPO")?;
        Self::new(token, owner, repo)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// A route under `/repos/{owner}/{repo}/`.
    pub(crate) fn repo_route(&self, suffix: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, suffix)
    }

    // ---- generic REST helpers ----
    //
    // Everything returns `serde_json::Value`; callers pick the fields
    // they need. GitHub returns JSON for all of these (the label PUT and
    // the comment POST included), so an empty body is an error.

    pub(crate) async fn rest_get(&self, route: &str) -> Result<serde_json::Value> {
        let value: serde_json::Value = self.octocrab.get(route, None::<&()>).await?;
        Ok(value)
    }

    pub(crate) async fn rest_post(
        &self,
        route: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let value: serde_json::Value = self.octocrab.post(route, Some(body)).await?;
        Ok(value)
    }

    pub(crate) async fn rest_put(
        &self,
        route: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let value: serde_json::Value = self.octocrab.put(route, Some(body)).await?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
