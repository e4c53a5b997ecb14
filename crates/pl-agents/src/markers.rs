//! Machine-readable HTML comment markers.
//!
//! Labels persist `(status, iteration)` and nothing else. Everything else
//! the loop needs to remember rides in HTML comments, invisible in
//! rendered markdown: the issue→PR link, which diff produced which
//! commit, and which fixes each review demanded. Review markers are
//! posted as plain issue comments, not review bodies, because the comment
//! listing endpoint does not return reviews.

use serde::{Deserialize, Serialize};

use pl_integrations::types::IssueComment;

const PR_PREFIX: &str = "<!--patchloop:pr=";
const APPLY_PREFIX: &str = "<!--patchloop:apply ";
const REVIEW_PREFIX: &str = "<!--patchloop:review ";
const END: &str = "-->";

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Marker linking an issue to the pull request opened for it.
pub fn pr_link_marker(pr: u64) -> String {
    format!("{PR_PREFIX}{pr}{END}")
}

/// Marker recording that `sha` was produced by applying the diff with the
/// given hash.
pub fn apply_marker(sha: &str, diff_hash: &str) -> String {
    format!("{APPLY_PREFIX}sha={sha} diff={diff_hash}{END}")
}

/// Marker recording the review outcome for `sha`, fixes embedded as JSON.
/// Doubles as the duplicate-delivery guard: a CI completion for a sha
/// that already has one is dropped.
pub fn review_marker(sha: &str, fixes: &[String]) -> String {
    // An HTML comment ends at the first "-->", so the embedded text must
    // not contain one.
    let safe: Vec<String> = fixes.iter().map(|f| f.replace("-->", "->")).collect();
    let json = serde_json::to_string(&safe).unwrap_or_else(|_| "[]".to_string());
    format!("{REVIEW_PREFIX}sha={sha} fixes={json}{END}")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyMarker {
    pub sha: String,
    pub diff_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewMarker {
    pub sha: String,
    pub fixes: Vec<String>,
}

/// Extract the PR number from an issue-link marker anywhere in `body`.
pub fn parse_pr_link(body: &str) -> Option<u64> {
    let start = body.find(PR_PREFIX)? + PR_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(END)?;
    rest[..end].trim().parse().ok()
}

pub fn parse_apply(body: &str) -> Option<ApplyMarker> {
    let inner = marker_payload(body, APPLY_PREFIX)?;
    let rest = inner.strip_prefix("sha=")?;
    let (sha, rest) = rest.split_once(' ')?;
    let diff_hash = rest.trim().strip_prefix("diff=")?;
    if sha.is_empty() || diff_hash.is_empty() {
        return None;
    }
    Some(ApplyMarker {
        sha: sha.to_string(),
        diff_hash: diff_hash.to_string(),
    })
}

pub fn parse_review(body: &str) -> Option<ReviewMarker> {
    let inner = marker_payload(body, REVIEW_PREFIX)?;
    let rest = inner.strip_prefix("sha=")?;
    let (sha, rest) = rest.split_once(' ')?;
    let json = rest.trim().strip_prefix("fixes=")?;
    let fixes: Vec<String> = serde_json::from_str(json).ok()?;
    if sha.is_empty() {
        return None;
    }
    Some(ReviewMarker {
        sha: sha.to_string(),
        fixes,
    })
}

fn marker_payload<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    let start = body.find(prefix)? + prefix.len();
    let rest = &body[start..];
    let end = rest.find(END)?;
    Some(rest[..end].trim())
}

// ---------------------------------------------------------------------------
// Comment scans
// ---------------------------------------------------------------------------

/// The most recent apply marker in a comment stream (oldest-first input).
pub fn latest_apply(comments: &[IssueComment]) -> Option<ApplyMarker> {
    comments.iter().rev().find_map(|c| parse_apply(&c.body))
}

/// The review marker for a specific sha, if one exists.
pub fn review_for_sha(comments: &[IssueComment], sha: &str) -> Option<ReviewMarker> {
    comments
        .iter()
        .find_map(|c| parse_review(&c.body).filter(|m| m.sha == sha))
}

/// Every review marker in comment order: the accumulated fix history.
pub fn fix_history(comments: &[IssueComment]) -> Vec<ReviewMarker> {
    comments.iter().filter_map(|c| parse_review(&c.body)).collect()
}

/// The newest review marker together with the human-readable text that
/// shared its comment. The text feeds fix-cycle prompts as the review
/// summary.
pub fn latest_review(comments: &[IssueComment]) -> Option<(ReviewMarker, String)> {
    comments.iter().rev().find_map(|c| {
        parse_review(&c.body).map(|marker| {
            let cut = c.body.find(REVIEW_PREFIX).unwrap_or(c.body.len());
            (marker, c.body[..cut].trim().to_string())
        })
    })
}

/// The PR a loop-managed issue links to, from its marker comment.
pub fn linked_pr(comments: &[IssueComment]) -> Option<u64> {
    comments.iter().rev().find_map(|c| parse_pr_link(&c.body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
