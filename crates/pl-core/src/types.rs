//! Shared domain types for the patch loop.
//!
//! A [`ChangeRequest`] is one managed pull request: the unit the agents
//! iterate on. Its [`Status`] is persisted on the host as labels (see
//! [`crate::labels`]) and advanced by the pure transition function in
//! `pl-agents`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a change request.
///
/// `Done` and `Failed` are terminal: every later event is absorbed as a
/// no-op. `Unmanaged` is the implicit status of any pull request the agents
/// have never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not under agent management.
    Unmanaged,
    /// A generation cycle is claimed but no commit has been pushed yet.
    PendingGeneration,
    /// A commit is pushed; waiting for the CI gate to report.
    AwaitingCi,
    /// CI reported; waiting for the reviewer verdict.
    AwaitingReview,
    /// Reviewer requested changes; waiting for the next fix cycle.
    FixRequested,
    /// Reviewer approved. Terminal.
    Done,
    /// Iteration budget exhausted, generation gave up, or an operator
    /// cancelled the run. Terminal.
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }

    /// True for every status that keeps the change request under agent
    /// control, i.e. everything except `Unmanaged`.
    pub fn is_managed(&self) -> bool {
        !matches!(self, Status::Unmanaged)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unmanaged => "unmanaged",
            Status::PendingGeneration => "managed-pending-generation",
            Status::AwaitingCi => "managed-awaiting-ci",
            Status::AwaitingReview => "managed-awaiting-review",
            Status::FixRequested => "fix-requested",
            Status::Done => "done",
            Status::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ---------------------------------------------------------------------------
// Change request
// ---------------------------------------------------------------------------

/// One managed pull request and the loop state attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub pr_number: u64,
    /// The issue that spawned this change request, when known.
    pub issue_number: Option<u64>,
    pub base_branch: String,
    pub head_branch: String,
    pub status: Status,
    /// Completed generate/review cycles. Starts at 1 once the first commit
    /// is pushed and only ever grows.
    pub iteration: u32,
    /// Hash of the last applied diff, for traceability across cycles.
    pub last_diff_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// CI outcome
// ---------------------------------------------------------------------------

/// One named check from the CI gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub exit_code: i32,
    #[serde(default)]
    pub log_tail: String,
}

impl CiCheck {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Entry shape of the JSON report the CI workflow hands to the loop:
/// a map of check name to `{ "exit_code": N, "log_tail": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiReportEntry {
    pub exit_code: i32,
    #[serde(default)]
    pub log_tail: String,
}

/// The CI gate's result for one pushed commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiOutcome {
    /// Commit the checks ran against.
    pub sha: String,
    pub checks: Vec<CiCheck>,
}

impl CiOutcome {
    pub fn new(sha: impl Into<String>, checks: Vec<CiCheck>) -> Self {
        Self {
            sha: sha.into(),
            checks,
        }
    }

    /// Build an outcome from the workflow's report map. `BTreeMap` keeps
    /// check order stable so summaries render the same on every run.
    pub fn from_report(sha: impl Into<String>, report: BTreeMap<String, CiReportEntry>) -> Self {
        let checks = report
            .into_iter()
            .map(|(name, entry)| CiCheck {
                name,
                exit_code: entry.exit_code,
                log_tail: entry.log_tail,
            })
            .collect();
        Self::new(sha, checks)
    }

    /// An empty outcome counts as green: a repository without a CI gate
    /// still flows through review.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(CiCheck::passed)
    }

    pub fn failing(&self) -> Vec<&CiCheck> {
        self.checks.iter().filter(|c| !c.passed()).collect()
    }

    /// Markdown summary of the outcome: a result table plus collapsed log
    /// tails for every failing check. Embedded in reviewer prompts and in
    /// posted review bodies.
    pub fn summary_md(&self) -> String {
        if self.checks.is_empty() {
            return format!("No CI checks reported for `{}`.", short_sha(&self.sha));
        }
        let mut out = String::new();
        out.push_str(&format!("CI results for `{}`:\n\n", short_sha(&self.sha)));
        out.push_str("| Check | Result |\n|---|---|\n");
        for check in &self.checks {
            let result = if check.passed() {
                "pass".to_string()
            } else {
                format!("fail (exit {})", check.exit_code)
            };
            out.push_str(&format!("| {} | {} |\n", check.name, result));
        }
        for check in self.failing() {
            if check.log_tail.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "\n<details><summary>Log tail: {}</summary>\n\n```\n{}\n```\n\n</details>\n",
                check.name,
                check.log_tail.trim_end()
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Review verdict
// ---------------------------------------------------------------------------

/// The reviewer's binary decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    RequestChanges,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Approve => "approve",
            Verdict::RequestChanges => "request-changes",
        };
        write!(f, "{}", s)
    }
}

/// Structured output of one review pass.
///
/// Construct through [`ReviewVerdict::approve`] or
/// [`ReviewVerdict::request_changes`] so the invariant holds: the fix list
/// is empty exactly when the verdict is `Approve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: Verdict,
    /// Concrete items the next fix cycle must address. Non-empty iff the
    /// verdict is `RequestChanges`.
    pub required_fixes: Vec<String>,
    /// Human-readable review body, markdown.
    pub summary: String,
    /// Rendered CI summary the verdict was based on.
    pub ci_summary: String,
    /// Reviewer self-reported confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

impl ReviewVerdict {
    pub fn approve(summary: impl Into<String>, ci_summary: impl Into<String>, confidence: f32) -> Self {
        Self {
            verdict: Verdict::Approve,
            required_fixes: Vec::new(),
            summary: summary.into(),
            ci_summary: ci_summary.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// A request-changes verdict always carries at least one item; an empty
    /// list is replaced with a generic one so the next cycle has something
    /// actionable.
    pub fn request_changes(
        mut required_fixes: Vec<String>,
        summary: impl Into<String>,
        ci_summary: impl Into<String>,
        confidence: f32,
    ) -> Self {
        required_fixes.retain(|f| !f.trim().is_empty());
        if required_fixes.is_empty() {
            required_fixes.push("Address the issues described in the review summary.".to_string());
        }
        Self {
            verdict: Verdict::RequestChanges,
            required_fixes,
            summary: summary.into(),
            ci_summary: ci_summary.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    pub fn needs_changes(&self) -> bool {
        self.verdict == Verdict::RequestChanges
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        return 0.0;
    }
    c.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Commit result
// ---------------------------------------------------------------------------

/// What one successful generation cycle produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    /// Full hex sha of the pushed commit.
    pub sha: String,
    pub message: String,
    pub files_changed: Vec<String>,
    /// Stable hash of the applied diff text, see [`diff_hash`].
    pub diff_hash: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

// Fixed seeds so the hash is stable across processes. The hash links
// commits to the diffs that produced them in marker comments, so two
// invocations must agree on it.
const DIFF_HASH_SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Stable 64-bit hash of a diff's text, rendered as 16 hex digits.
pub fn diff_hash(text: &str) -> String {
    use std::hash::{BuildHasher, Hasher};
    let (k0, k1, k2, k3) = DIFF_HASH_SEEDS;
    let mut hasher = ahash::RandomState::with_seeds(k0, k1, k2, k3).build_hasher();
    hasher.write(text.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// First seven characters of a sha, for log lines and summaries.
pub fn short_sha(sha: &str) -> &str {
    if sha.len() > 7 {
        &sha[..7]
    } else {
        sha
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_check(name: &str, exit_code: i32, log_tail: &str) -> CiCheck {
        CiCheck {
            name: name.to_string(),
            exit_code,
            log_tail: log_tail.to_string(),
        }
    }

    #[test]
    fn status_display_uses_the_wire_names() {
        assert_eq!(
            Status::PendingGeneration.to_string(),
            "managed-pending-generation"
        );
        assert_eq!(Status::AwaitingCi.to_string(), "managed-awaiting-ci");
        assert_eq!(Status::FixRequested.to_string(), "fix-requested");
        assert_eq!(Status::Unmanaged.to_string(), "unmanaged");
    }

    #[test]
    fn status_terminal_set() {
        assert!(Status::Done.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::AwaitingCi.is_terminal());
        assert!(!Status::FixRequested.is_terminal());
        assert!(!Status::Unmanaged.is_terminal());
    }

    #[test]
    fn status_serde_round_trip() {
        let json = serde_json::to_string(&Status::AwaitingReview).unwrap();
        assert_eq!(json, "\"awaiting_review\"");
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::AwaitingReview);
    }

    #[test]
    fn ci_outcome_passed_requires_all_green() {
        let green = CiOutcome::new("abc1234def", vec![make_check("lint", 0, ""), make_check("test", 0, "")]);
        assert!(green.passed());
        assert!(green.failing().is_empty());

        let red = CiOutcome::new(
            "abc1234def",
            vec![make_check("lint", 0, ""), make_check("test", 2, "assertion failed")],
        );
        assert!(!red.passed());
        assert_eq!(red.failing().len(), 1);
        assert_eq!(red.failing()[0].name, "test");
    }

    #[test]
    fn ci_outcome_empty_is_green() {
        let outcome = CiOutcome::new("abc1234def", vec![]);
        assert!(outcome.passed());
        assert!(outcome.summary_md().contains("No CI checks"));
    }

    #[test]
    fn ci_summary_renders_table_and_log_tail() {
        let outcome = CiOutcome::new(
            "abcdef0123456789",
            vec![make_check("lint", 0, ""), make_check("test", 1, "3 failed")],
        );
        let md = outcome.summary_md();
        assert!(md.contains("`abcdef0`"));
        assert!(md.contains("| lint | pass |"));
        assert!(md.contains("| test | fail (exit 1) |"));
        assert!(md.contains("3 failed"));
    }

    #[test]
    fn ci_outcome_from_report_keeps_name_order() {
        let mut report = BTreeMap::new();
        report.insert(
            "test".to_string(),
            CiReportEntry {
                exit_code: 1,
                log_tail: "boom".to_string(),
            },
        );
        report.insert(
            "lint".to_string(),
            CiReportEntry {
                exit_code: 0,
                log_tail: String::new(),
            },
        );
        let outcome = CiOutcome::from_report("deadbeef", report);
        assert_eq!(outcome.checks[0].name, "lint");
        assert_eq!(outcome.checks[1].name, "test");
        assert!(!outcome.passed());
    }

    #[test]
    fn approve_verdict_has_no_fixes() {
        let v = ReviewVerdict::approve("looks good", "all green", 0.9);
        assert_eq!(v.verdict, Verdict::Approve);
        assert!(v.required_fixes.is_empty());
        assert!(!v.needs_changes());
    }

    #[test]
    fn request_changes_backfills_empty_fix_list() {
        let v = ReviewVerdict::request_changes(vec!["  ".to_string()], "rough", "red", 0.5);
        assert!(v.needs_changes());
        assert_eq!(v.required_fixes.len(), 1);
        assert!(v.required_fixes[0].contains("review summary"));
    }

    #[test]
    fn request_changes_keeps_real_items() {
        let v = ReviewVerdict::request_changes(
            vec!["fix the off-by-one".to_string(), "add a test".to_string()],
            "two problems",
            "green",
            0.8,
        );
        assert_eq!(v.required_fixes.len(), 2);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(ReviewVerdict::approve("", "", 3.0).confidence, 1.0);
        assert_eq!(ReviewVerdict::approve("", "", -1.0).confidence, 0.0);
        assert_eq!(ReviewVerdict::approve("", "", f32::NAN).confidence, 0.0);
    }

    #[test]
    fn diff_hash_is_stable_and_distinguishes() {
        let a = diff_hash("diff --git a/x b/x\n");
        let b = diff_hash("diff --git a/x b/x\n");
        let c = diff_hash("diff --git a/y b/y\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn short_sha_truncates() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }
}
