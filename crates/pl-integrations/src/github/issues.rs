use crate::types::{GitHubIssue, IssueState};

use super::client::{GitHubClient, Result};

/// Get a single issue by number.
pub async fn get_issue(client: &GitHubClient, number: u64) -> Result<GitHubIssue> {
    let issue = client
        .octocrab
        .issues(&client.owner, &client.repo)
        .get(number)
        .await?;

    Ok(octocrab_issue_to_github_issue(issue))
}

/// Extract the issue a pull request closes from its body, following the
/// closing-keyword convention (`Closes #12`, `fixes #7`, ...). Returns the
/// first linked number.
pub fn linked_issue_number(body: &str) -> Option<u64> {
    const KEYWORDS: [&str; 9] = [
        "close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved",
    ];

    let mut tokens = body.split_whitespace().peekable();
    while let Some(word) = tokens.next() {
        let keyword = word
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        if !KEYWORDS.contains(&keyword.as_str()) {
            continue;
        }
        if let Some(next) = tokens.peek() {
            if let Some(rest) = next.strip_prefix('#') {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if !digits.is_empty() {
                    return digits.parse().ok();
                }
            }
        }
    }
    None
}

// ---- internal helpers -------------------------------------------------------

fn octocrab_issue_to_github_issue(issue: octocrab::models::issues::Issue) -> GitHubIssue {
    let state = match issue.state {
        octocrab::models::IssueState::Open => IssueState::Open,
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    };

    let labels = issue.labels.iter().map(|l| l.name.clone()).collect();

    GitHubIssue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        state,
        labels,
        author: issue.user.login.clone(),
        html_url: issue.html_url.to_string(),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
    }
}
