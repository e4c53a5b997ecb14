use serde_json::json;

use super::client::{GitHubClient, GitHubError, Result};

/// The verdict attached to a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewAction {
    /// The `event` value the review endpoint expects.
    pub fn as_event(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "APPROVE",
            ReviewAction::RequestChanges => "REQUEST_CHANGES",
            ReviewAction::Comment => "COMMENT",
        }
    }
}

/// Submit a pull request review in a single call. Returns the review id.
///
/// Reviews are their own namespace on the host: their bodies never show
/// up in the issue-comment listing, which is why anything the loop needs
/// to read back later goes through a comment instead.
pub async fn create_review(
    client: &GitHubClient,
    number: u64,
    action: ReviewAction,
    body: &str,
) -> Result<u64> {
    let route = client.repo_route(&format!("pulls/{number}/reviews"));
    let payload = json!({
        "body": body,
        "event": action.as_event(),
    });
    let value = client.rest_post(&route, &payload).await?;

    value
        .get("id")
        .and_then(|id| id.as_u64())
        .ok_or_else(|| GitHubError::UnexpectedResponse(route))
}
