//! Host-side domain types, decoupled from octocrab's wire models so the
//! agent crates never depend on the client library directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub author: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitHubIssue {
    /// The requirement the agents work against: title plus body.
    pub fn requirement_text(&self) -> String {
        if self.body.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: PrState,
    pub head_branch: String,
    pub base_branch: String,
    pub labels: Vec<String>,
    pub author: String,
    pub html_url: String,
    pub draft: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

/// An issue comment. Pull requests share the issue comment namespace, so
/// these are also the comments on a managed PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_text_joins_title_and_body() {
        let issue = GitHubIssue {
            number: 7,
            title: "Add retry logic".to_string(),
            body: "The client gives up on the first failure.".to_string(),
            state: IssueState::Open,
            labels: vec![],
            author: "someone".to_string(),
            html_url: "https://example.invalid/7".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let text = issue.requirement_text();
        assert!(text.starts_with("Add retry logic\n\n"));
        assert!(text.contains("first failure"));
    }

    #[test]
    fn requirement_text_without_body_is_just_the_title() {
        let issue = GitHubIssue {
            number: 7,
            title: "Fix the flaky test".to_string(),
            body: "   ".to_string(),
            state: IssueState::Open,
            labels: vec![],
            author: "someone".to_string(),
            html_url: "https://example.invalid/7".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(issue.requirement_text(), "Fix the flaky test");
    }

    #[test]
    fn state_serde_round_trip() {
        let json = serde_json::to_string(&PrState::Merged).unwrap();
        assert_eq!(json, "\"merged\"");
        let back: PrState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PrState::Merged);
    }
}
