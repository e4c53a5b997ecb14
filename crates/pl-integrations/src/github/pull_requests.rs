use crate::types::{GitHubPullRequest, PrState};

use super::client::{GitHubClient, Result};

/// Get a single pull request by number.
pub async fn get_pull_request(client: &GitHubClient, number: u64) -> Result<GitHubPullRequest> {
    let pr = client
        .octocrab
        .pulls(&client.owner, &client.repo)
        .get(number)
        .await?;

    Ok(octocrab_pr_to_github_pr(pr))
}

/// Create a new pull request.
pub async fn create_pull_request(
    client: &GitHubClient,
    title: &str,
    body: &str,
    head: &str,
    base: &str,
) -> Result<GitHubPullRequest> {
    let pr = client
        .octocrab
        .pulls(&client.owner, &client.repo)
        .create(title, head, base)
        .body(body)
        .send()
        .await?;

    Ok(octocrab_pr_to_github_pr(pr))
}

/// List open pull requests, newest first. One page is enough for the
/// sweep: a repository with more than a hundred open agent PRs has
/// bigger problems.
pub async fn list_open_pull_requests(client: &GitHubClient) -> Result<Vec<GitHubPullRequest>> {
    let page = client
        .octocrab
        .pulls(&client.owner, &client.repo)
        .list()
        .state(octocrab::params::State::Open)
        .per_page(100)
        .send()
        .await?;

    Ok(page.items.into_iter().map(octocrab_pr_to_github_pr).collect())
}

/// Find the open pull request whose head is the given branch, if any.
pub async fn find_by_head(
    client: &GitHubClient,
    branch: &str,
) -> Result<Option<GitHubPullRequest>> {
    let page = client
        .octocrab
        .pulls(&client.owner, &client.repo)
        .list()
        .state(octocrab::params::State::Open)
        .head(format!("{}:{}", client.owner, branch))
        .per_page(1)
        .send()
        .await?;

    Ok(page.items.into_iter().next().map(octocrab_pr_to_github_pr))
}

/// Fetch the unified diff of a pull request.
pub async fn get_pull_request_diff(client: &GitHubClient, number: u64) -> Result<String> {
    let diff = client
        .octocrab
        .pulls(&client.owner, &client.repo)
        .get_diff(number)
        .await?;

    Ok(diff)
}

// ---- internal helpers -------------------------------------------------------

fn octocrab_pr_to_github_pr(pr: octocrab::models::pulls::PullRequest) -> GitHubPullRequest {
    let state = if pr.merged_at.is_some() {
        PrState::Merged
    } else {
        match pr.state {
            Some(octocrab::models::IssueState::Closed) => PrState::Closed,
            _ => PrState::Open,
        }
    };

    let labels = pr
        .labels
        .unwrap_or_default()
        .iter()
        .map(|l| l.name.clone())
        .collect();

    let author = pr
        .user
        .as_ref()
        .map(|u| u.login.clone())
        .unwrap_or_default();

    let created_at = pr.created_at.unwrap_or_else(chrono::Utc::now);
    let updated_at = pr.updated_at.unwrap_or(created_at);

    GitHubPullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        state,
        head_branch: pr.head.ref_field.clone(),
        base_branch: pr.base.ref_field.clone(),
        labels,
        author,
        html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        draft: pr.draft.unwrap_or(false),
        created_at,
        updated_at,
    }
}
