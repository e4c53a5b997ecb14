//! The [`ChangeHost`] capability trait and its two implementations.
//!
//! Agents and the orchestrator only ever hold a `&dyn ChangeHost`, so the
//! whole loop runs against [`MockHost`] in tests with no network and no
//! credentials. [`GitHubHost`] is the production implementation; it wraps
//! every call in bounded backoff so rate limits and 5xx blips do not
//! surface as failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::github::{
    comments, issues, labels, pull_requests, reviews, GitHubClient, GitHubError, ReviewAction,
};
use crate::retry::{github_transient, with_backoff, Backoff};
use crate::types::{GitHubIssue, GitHubPullRequest, IssueComment, IssueState, PrState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host api error: {0}")]
    Api(#[from] GitHubError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("host unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, HostError>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Everything the loop needs from the hosting platform, and nothing more.
/// Issue numbers and pull request numbers share one `number` namespace on
/// GitHub, so label and comment calls take either.
#[async_trait]
pub trait ChangeHost: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<GitHubIssue>;

    async fn get_pull_request(&self, number: u64) -> Result<GitHubPullRequest>;

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<GitHubPullRequest>;

    async fn list_open_pull_requests(&self) -> Result<Vec<GitHubPullRequest>>;

    async fn find_pull_request_by_head(&self, branch: &str)
        -> Result<Option<GitHubPullRequest>>;

    async fn pull_request_diff(&self, number: u64) -> Result<String>;

    async fn list_labels(&self, number: u64) -> Result<Vec<String>>;

    /// Replace the full label set in one write.
    async fn set_labels(&self, number: u64, labels: &[String]) -> Result<Vec<String>>;

    async fn comment(&self, number: u64, body: &str) -> Result<IssueComment>;

    async fn list_comments(&self, number: u64) -> Result<Vec<IssueComment>>;

    /// Submit a formal review. Returns the review id.
    async fn submit_review(&self, number: u64, action: ReviewAction, body: &str) -> Result<u64>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// GitHub implementation
// ---------------------------------------------------------------------------

pub struct GitHubHost {
    client: GitHubClient,
    /// Separate identity for reviews. GitHub rejects a request-changes
    /// review from the account that authored the PR, so when the loop
    /// both writes and reviews code it needs two tokens.
    reviewer: Option<GitHubClient>,
    backoff: Backoff,
}

impl GitHubHost {
    pub fn new(client: GitHubClient) -> Self {
        Self {
            client,
            reviewer: None,
            backoff: Backoff::default(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: GitHubClient) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn review_client(&self) -> &GitHubClient {
        self.reviewer.as_ref().unwrap_or(&self.client)
    }
}

#[async_trait]
impl ChangeHost for GitHubHost {
    async fn get_issue(&self, number: u64) -> Result<GitHubIssue> {
        let issue = with_backoff(self.backoff, github_transient, || {
            issues::get_issue(&self.client, number)
        })
        .await?;
        Ok(issue)
    }

    async fn get_pull_request(&self, number: u64) -> Result<GitHubPullRequest> {
        let pr = with_backoff(self.backoff, github_transient, || {
            pull_requests::get_pull_request(&self.client, number)
        })
        .await?;
        Ok(pr)
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<GitHubPullRequest> {
        let pr = with_backoff(self.backoff, github_transient, || {
            pull_requests::create_pull_request(&self.client, title, body, head, base)
        })
        .await?;
        Ok(pr)
    }

    async fn list_open_pull_requests(&self) -> Result<Vec<GitHubPullRequest>> {
        let prs = with_backoff(self.backoff, github_transient, || {
            pull_requests::list_open_pull_requests(&self.client)
        })
        .await?;
        Ok(prs)
    }

    async fn find_pull_request_by_head(
        &self,
        branch: &str,
    ) -> Result<Option<GitHubPullRequest>> {
        let pr = with_backoff(self.backoff, github_transient, || {
            pull_requests::find_by_head(&self.client, branch)
        })
        .await?;
        Ok(pr)
    }

    async fn pull_request_diff(&self, number: u64) -> Result<String> {
        let diff = with_backoff(self.backoff, github_transient, || {
            pull_requests::get_pull_request_diff(&self.client, number)
        })
        .await?;
        Ok(diff)
    }

    async fn list_labels(&self, number: u64) -> Result<Vec<String>> {
        let names = with_backoff(self.backoff, github_transient, || {
            labels::list_labels(&self.client, number)
        })
        .await?;
        Ok(names)
    }

    async fn set_labels(&self, number: u64, set: &[String]) -> Result<Vec<String>> {
        let names = with_backoff(self.backoff, github_transient, || {
            labels::set_labels(&self.client, number, set)
        })
        .await?;
        Ok(names)
    }

    async fn comment(&self, number: u64, body: &str) -> Result<IssueComment> {
        let comment = with_backoff(self.backoff, github_transient, || {
            comments::post_comment(&self.client, number, body)
        })
        .await?;
        Ok(comment)
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<IssueComment>> {
        let list = with_backoff(self.backoff, github_transient, || {
            comments::list_comments(&self.client, number)
        })
        .await?;
        Ok(list)
    }

    async fn submit_review(&self, number: u64, action: ReviewAction, body: &str) -> Result<u64> {
        let client = self.review_client();
        let id = with_backoff(self.backoff, github_transient, || {
            reviews::create_review(client, number, action, body)
        })
        .await?;
        Ok(id)
    }

    fn name(&self) -> &str {
        "github"
    }
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// A review the mock recorded instead of submitting.
#[derive(Debug, Clone)]
pub struct RecordedReview {
    pub number: u64,
    pub action: ReviewAction,
    pub body: String,
}

/// In-memory host for tests. Seed it with issues, pull requests and
/// diffs, then inspect labels, comments and reviews after the loop runs.
/// Errors pushed via [`MockHost::inject_error`] are returned by the next
/// call, whatever it is.
#[derive(Default)]
pub struct MockHost {
    issues: Mutex<HashMap<u64, GitHubIssue>>,
    prs: Mutex<HashMap<u64, GitHubPullRequest>>,
    labels: Mutex<HashMap<u64, Vec<String>>>,
    comments: Mutex<HashMap<u64, Vec<IssueComment>>>,
    diffs: Mutex<HashMap<u64, String>>,
    reviews: Mutex<Vec<RecordedReview>>,
    errors: Mutex<VecDeque<HostError>>,
    next_pr_number: AtomicU64,
    next_comment_id: AtomicU64,
    next_review_id: AtomicU64,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            next_pr_number: AtomicU64::new(100),
            next_comment_id: AtomicU64::new(1),
            next_review_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    // ---- seeding ----

    pub fn seed_issue(&self, number: u64, title: &str, body: &str) {
        let now = Utc::now();
        let issue = GitHubIssue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: IssueState::Open,
            labels: Vec::new(),
            author: "someone".to_string(),
            html_url: format!("https://example.invalid/issues/{number}"),
            created_at: now,
            updated_at: now,
        };
        self.issues.lock().unwrap().insert(number, issue);
    }

    pub fn seed_pull_request(&self, number: u64, head: &str, base: &str, body: &str) {
        let now = Utc::now();
        let pr = GitHubPullRequest {
            number,
            title: format!("pr {number}"),
            body: body.to_string(),
            state: PrState::Open,
            head_branch: head.to_string(),
            base_branch: base.to_string(),
            labels: Vec::new(),
            author: "patchloop[bot]".to_string(),
            html_url: format!("https://example.invalid/pull/{number}"),
            draft: false,
            created_at: now,
            updated_at: now,
        };
        self.prs.lock().unwrap().insert(number, pr);
    }

    pub fn insert_pull_request(&self, pr: GitHubPullRequest) {
        self.prs.lock().unwrap().insert(pr.number, pr);
    }

    pub fn set_diff(&self, number: u64, diff: &str) {
        self.diffs.lock().unwrap().insert(number, diff.to_string());
    }

    /// Write labels directly, bypassing the trait. Tests use this to
    /// simulate another writer racing the loop.
    pub fn put_labels(&self, number: u64, labels: Vec<String>) {
        self.labels.lock().unwrap().insert(number, labels);
    }

    pub fn inject_error(&self, err: HostError) {
        self.errors.lock().unwrap().push_back(err);
    }

    // ---- inspection ----

    pub fn labels_of(&self, number: u64) -> Vec<String> {
        self.labels
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn comments_of(&self, number: u64) -> Vec<IssueComment> {
        self.comments
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn recorded_reviews(&self) -> Vec<RecordedReview> {
        self.reviews.lock().unwrap().clone()
    }

    pub fn pull_request(&self, number: u64) -> Option<GitHubPullRequest> {
        self.prs.lock().unwrap().get(&number).cloned()
    }

    fn take_injected(&self) -> Option<HostError> {
        self.errors.lock().unwrap().pop_front()
    }

    /// Pull request reads reflect the live label map, like the real API.
    fn with_labels(&self, mut pr: GitHubPullRequest) -> GitHubPullRequest {
        pr.labels = self.labels_of(pr.number);
        pr
    }
}

#[async_trait]
impl ChangeHost for MockHost {
    async fn get_issue(&self, number: u64) -> Result<GitHubIssue> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        self.issues
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("issue #{number}")))
    }

    async fn get_pull_request(&self, number: u64) -> Result<GitHubPullRequest> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        self.prs
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .map(|pr| self.with_labels(pr))
            .ok_or_else(|| HostError::NotFound(format!("pull request #{number}")))
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<GitHubPullRequest> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let pr = GitHubPullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: PrState::Open,
            head_branch: head.to_string(),
            base_branch: base.to_string(),
            labels: Vec::new(),
            author: "patchloop[bot]".to_string(),
            html_url: format!("https://example.invalid/pull/{number}"),
            draft: false,
            created_at: now,
            updated_at: now,
        };
        self.prs.lock().unwrap().insert(number, pr.clone());
        Ok(pr)
    }

    async fn list_open_pull_requests(&self) -> Result<Vec<GitHubPullRequest>> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let mut prs: Vec<_> = self
            .prs
            .lock()
            .unwrap()
            .values()
            .filter(|pr| pr.state == PrState::Open)
            .cloned()
            .map(|pr| self.with_labels(pr))
            .collect();
        prs.sort_by_key(|pr| pr.number);
        Ok(prs)
    }

    async fn find_pull_request_by_head(
        &self,
        branch: &str,
    ) -> Result<Option<GitHubPullRequest>> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        Ok(self
            .prs
            .lock()
            .unwrap()
            .values()
            .find(|pr| pr.state == PrState::Open && pr.head_branch == branch)
            .cloned()
            .map(|pr| self.with_labels(pr)))
    }

    async fn pull_request_diff(&self, number: u64) -> Result<String> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        self.diffs
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("diff for pull request #{number}")))
    }

    async fn list_labels(&self, number: u64) -> Result<Vec<String>> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        Ok(self.labels_of(number))
    }

    async fn set_labels(&self, number: u64, labels: &[String]) -> Result<Vec<String>> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let set = labels.to_vec();
        self.labels.lock().unwrap().insert(number, set.clone());
        Ok(set)
    }

    async fn comment(&self, number: u64, body: &str) -> Result<IssueComment> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let comment = IssueComment {
            id: self.next_comment_id.fetch_add(1, Ordering::SeqCst),
            body: body.to_string(),
            author: "patchloop[bot]".to_string(),
            created_at: Utc::now(),
        };
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(comment.clone());
        Ok(comment)
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<IssueComment>> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        Ok(self.comments_of(number))
    }

    async fn submit_review(&self, number: u64, action: ReviewAction, body: &str) -> Result<u64> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        self.reviews.lock().unwrap().push(RecordedReview {
            number,
            action,
            body: body.to_string(),
        });
        Ok(self.next_review_id.fetch_add(1, Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
