use crate::types::IssueComment;

use super::client::{GitHubClient, Result};

/// Post a comment on an issue or pull request.
pub async fn post_comment(
    client: &GitHubClient,
    number: u64,
    body: &str,
) -> Result<IssueComment> {
    let comment = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .create_comment(number, body)
        .await?;

    Ok(octocrab_comment_to_comment(comment))
}

/// List comments on an issue or pull request, oldest first. One page of a
/// hundred covers any realistic loop run; review bodies live in a separate
/// namespace and are deliberately not part of this listing.
pub async fn list_comments(client: &GitHubClient, number: u64) -> Result<Vec<IssueComment>> {
    let page = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .list_comments(number)
        .per_page(100)
        .send()
        .await?;

    Ok(page
        .items
        .into_iter()
        .map(octocrab_comment_to_comment)
        .collect())
}

// ---- internal helpers -------------------------------------------------------

fn octocrab_comment_to_comment(comment: octocrab::models::issues::Comment) -> IssueComment {
    IssueComment {
        id: comment.id.0,
        body: comment.body.unwrap_or_default(),
        author: comment.user.login.clone(),
        created_at: comment.created_at,
    }
}
