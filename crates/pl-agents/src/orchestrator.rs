//! The orchestrator: one external event in, side effects out, one status
//! back.
//!
//! Every invocation is self-contained. It reads the persisted state from
//! the pull request's labels, runs the pure transition function, performs
//! the side effects that state calls for, and persists the result with an
//! optimistic compare-and-set. A [`TrackerError::Conflict`] anywhere means
//! another invocation owns the change request; the event is dropped and
//! the live status returned, so replays and races are always safe.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use pl_core::config::AgentSettings;
use pl_core::labels::{decode, LabelState};
use pl_core::types::{short_sha, ChangeRequest, CiOutcome, ReviewVerdict, Status};
use pl_integrations::github::issues::linked_issue_number;
use pl_integrations::github::ReviewAction;
use pl_integrations::host::{ChangeHost, HostError};
use pl_integrations::types::{GitHubPullRequest, IssueComment};

use crate::code_agent::{AgentError, CodeAgent, GenerationContext};
use crate::markers::{
    apply_marker, fix_history, latest_apply, latest_review, linked_pr, pr_link_marker,
    review_for_sha, review_marker, ApplyMarker, ReviewMarker,
};
use crate::reviewer::Reviewer;
use crate::state_machine::{RunEvent, RunMachine};
use crate::tracker::{IterationTracker, TrackerError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// External triggers. One trigger, one CLI invocation, one `handle_event`.
#[derive(Debug, Clone)]
pub enum Event {
    /// Open a change request for an issue and run the first cycle.
    IssueOpened { issue: u64 },
    /// The CI gate reported for a pushed commit; review it.
    CiCompleted { pr: u64, outcome: CiOutcome },
    /// Apply an already-computed verdict to a change request.
    ReviewCompleted { pr: u64, verdict: ReviewVerdict },
    /// Run the next fix cycle for a change whose review requested one.
    FixRequested { pr: u64 },
    /// Operator cancellation.
    Cancelled { pr: u64 },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::IssueOpened { .. } => "issue-opened",
            Event::CiCompleted { .. } => "ci-completed",
            Event::ReviewCompleted { .. } => "review-completed",
            Event::FixRequested { .. } => "fix-requested",
            Event::Cancelled { .. } => "cancelled",
        }
    }

    fn pr(&self) -> Option<u64> {
        match self {
            Event::IssueOpened { .. } => None,
            Event::CiCompleted { pr, .. }
            | Event::ReviewCompleted { pr, .. }
            | Event::FixRequested { pr }
            | Event::Cancelled { pr } => Some(*pr),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one sweep did.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Open pull requests looked at.
    pub examined: usize,
    /// Stale change requests forced to failed.
    pub stopped: Vec<u64>,
    /// Candidates whose labels moved mid-sweep.
    pub skipped_conflicts: usize,
}

/// Read-only snapshot of one change request, for status output.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub change: ChangeRequest,
    /// The label set was inconsistent and decoded by precedence.
    pub dirty: bool,
    pub last_commit: Option<ApplyMarker>,
    /// Every recorded review, oldest first.
    pub reviews: Vec<ReviewMarker>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    host: Arc<dyn ChangeHost>,
    tracker: IterationTracker,
    code_agent: CodeAgent,
    reviewer: Reviewer,
    settings: AgentSettings,
    base_branch: String,
}

impl Orchestrator {
    pub fn new(
        host: Arc<dyn ChangeHost>,
        code_agent: CodeAgent,
        reviewer: Reviewer,
        settings: AgentSettings,
        base_branch: impl Into<String>,
    ) -> Self {
        let tracker = IterationTracker::new(host.clone());
        Self {
            host,
            tracker,
            code_agent,
            reviewer,
            settings,
            base_branch: base_branch.into(),
        }
    }

    /// Handle one event end to end and return the resulting status.
    pub async fn handle_event(&self, event: Event) -> Result<Status> {
        let run = Uuid::new_v4();
        let kind = event.kind();
        let pr = event.pr();
        info!(%run, event = kind, pr, "handling event");

        let result = match event {
            Event::IssueOpened { issue } => self.on_issue_opened(issue).await,
            Event::CiCompleted { pr, outcome } => self.on_ci_completed(pr, outcome).await,
            Event::ReviewCompleted { pr, verdict } => {
                self.on_review_completed(pr, verdict).await
            }
            Event::FixRequested { pr } => self.on_fix_tick(pr).await,
            Event::Cancelled { pr } => self.on_cancelled(pr).await,
        };

        match result {
            Ok(status) => {
                info!(%run, event = kind, status = %status, "event handled");
                Ok(status)
            }
            Err(OrchestratorError::Tracker(TrackerError::Conflict { expected, found })) => {
                info!(
                    %run,
                    event = kind,
                    expected = %expected,
                    found = %found,
                    "another writer advanced this change request; yielding"
                );
                match pr {
                    Some(number) => Ok(self.tracker.get(number).await?.status),
                    None => Ok(Status::Unmanaged),
                }
            }
            Err(e) => {
                error!(%run, event = kind, error = %e, "event failed");
                Err(e)
            }
        }
    }

    /// First cycle for an issue: branch, generate, open the PR, claim it.
    async fn on_issue_opened(&self, issue_number: u64) -> Result<Status> {
        let issue = self.host.get_issue(issue_number).await?;
        let branch = format!("{}{}", self.settings.branch_prefix, issue_number);

        // Re-delivered trigger: the change request already exists.
        if let Some(existing) = self.host.find_pull_request_by_head(&branch).await? {
            let state = decode(&existing.labels);
            info!(
                issue = issue_number,
                pr = existing.number,
                status = %state.status,
                "change request already open for this issue"
            );
            return Ok(state.status);
        }
        // The branch lookup misses a pull request whose head was renamed
        // or closed; the marker on the issue is the durable link.
        let issue_comments = self.host.list_comments(issue_number).await?;
        if let Some(linked) = linked_pr(&issue_comments) {
            let existing = self.host.get_pull_request(linked).await?;
            let state = decode(&existing.labels);
            info!(
                issue = issue_number,
                pr = linked,
                status = %state.status,
                "issue already linked to a change request"
            );
            return Ok(state.status);
        }

        let mut machine = RunMachine::new(Status::Unmanaged, 0, self.settings.max_iterations);
        machine.apply(RunEvent::IssueOpened);
        machine.bump_iteration();

        let ctx = GenerationContext::first_cycle(issue.requirement_text(), &branch, &self.base_branch);
        let commit = match self.code_agent.generate_and_apply(&ctx).await {
            Ok(commit) => commit,
            Err(err) => {
                machine.apply(RunEvent::GenerationFailed);
                warn!(issue = issue_number, error = %err, "first cycle produced no commit");
                let body = format!(
                    "{}\n\nNo pull request was opened.",
                    generation_failure_text(&err, machine.iteration())
                );
                self.host.comment(issue_number, &body).await?;
                return Ok(Status::Failed);
            }
        };
        machine.apply(RunEvent::CommitPushed);

        let body = format!("Automated change for the linked issue.\n\nCloses #{issue_number}");
        let pull = self
            .host
            .create_pull_request(&issue.title, &body, &branch, &self.base_branch)
            .await?;

        // Claim before any comment. If someone labeled the fresh PR in
        // the meantime, they own it and we leave quietly.
        match self
            .tracker
            .set(pull.number, Status::Unmanaged, 0, machine.status(), machine.iteration())
            .await
        {
            Ok(()) => {}
            Err(TrackerError::Conflict { expected, found }) => {
                info!(
                    pr = pull.number,
                    expected = %expected,
                    found = %found,
                    "new pull request was labeled by another writer; leaving it"
                );
                return Ok(self.tracker.get(pull.number).await?.status);
            }
            Err(e) => return Err(e.into()),
        }

        let issue_note = format!(
            "Opened {} for this issue.\n\n{}",
            pull.html_url,
            pr_link_marker(pull.number)
        );
        self.host.comment(issue_number, &issue_note).await?;
        self.host
            .comment(pull.number, &push_note(&commit.sha, machine.iteration(), commit.files_changed.len(), &commit.diff_hash))
            .await?;

        info!(
            issue = issue_number,
            pr = pull.number,
            sha = short_sha(&commit.sha),
            "change request opened"
        );
        Ok(machine.status())
    }

    /// CI reported: run the reviewer and apply its verdict.
    async fn on_ci_completed(&self, pr_number: u64, outcome: CiOutcome) -> Result<Status> {
        let state = self.tracker.get(pr_number).await?;
        if state.status.is_terminal() {
            info!(pr = pr_number, status = %state.status, "terminal change request; dropping event");
            return Ok(state.status);
        }
        if state.status != Status::AwaitingCi {
            warn!(pr = pr_number, status = %state.status, "not awaiting ci; dropping event");
            return Ok(state.status);
        }

        let comments = self.host.list_comments(pr_number).await?;
        if review_for_sha(&comments, &outcome.sha).is_some() {
            info!(
                pr = pr_number,
                sha = short_sha(&outcome.sha),
                "sha already reviewed; dropping replayed delivery"
            );
            return Ok(state.status);
        }
        if let Some(apply) = latest_apply(&comments) {
            if apply.sha != outcome.sha {
                warn!(
                    pr = pr_number,
                    ci_sha = short_sha(&outcome.sha),
                    head_sha = short_sha(&apply.sha),
                    "ci result is not for the recorded head; dropping"
                );
                return Ok(state.status);
            }
        }

        let pull = self.host.get_pull_request(pr_number).await?;
        let requirement = self.requirement_for(&pull).await?;
        let diff = self.host.pull_request_diff(pr_number).await?;

        // The reviewer runs before the claim: it has no side effects, so
        // a lost claim later costs nothing visible.
        let verdict = match self.reviewer.review(&requirement, &diff, &outcome).await {
            Ok(v) => v,
            Err(err) => {
                warn!(pr = pr_number, error = %err, "review pass failed; requesting changes");
                ReviewVerdict::request_changes(
                    vec!["Review failed, please recheck.".to_string()],
                    format!("The automated review did not produce a verdict: {err}"),
                    outcome.summary_md(),
                    0.0,
                )
            }
        };

        self.apply_verdict(pr_number, state, &comments, &outcome.sha, verdict)
            .await
    }

    /// A verdict computed elsewhere: validate it against the recorded
    /// head and apply it.
    async fn on_review_completed(&self, pr_number: u64, verdict: ReviewVerdict) -> Result<Status> {
        let state = self.tracker.get(pr_number).await?;
        if state.status.is_terminal() {
            info!(pr = pr_number, status = %state.status, "terminal change request; dropping event");
            return Ok(state.status);
        }
        let comments = self.host.list_comments(pr_number).await?;
        let Some(apply) = latest_apply(&comments) else {
            warn!(pr = pr_number, "no pushed commit recorded; dropping verdict");
            return Ok(state.status);
        };
        if review_for_sha(&comments, &apply.sha).is_some() {
            info!(
                pr = pr_number,
                sha = short_sha(&apply.sha),
                "sha already reviewed; dropping replayed delivery"
            );
            return Ok(state.status);
        }
        self.apply_verdict(pr_number, state, &comments, &apply.sha, verdict)
            .await
    }

    /// Shared tail of the review flows: advance the machine through
    /// review completion, claim the transition, then post the review and
    /// its marker. The claim precedes every visible side effect, so a
    /// losing racer exits without a trace.
    async fn apply_verdict(
        &self,
        pr_number: u64,
        state: LabelState,
        comments: &[IssueComment],
        sha: &str,
        verdict: ReviewVerdict,
    ) -> Result<Status> {
        let mut machine =
            RunMachine::new(state.status, state.iteration, self.settings.max_iterations);
        if machine.apply(RunEvent::CiCompleted).is_none() {
            warn!(pr = pr_number, status = %state.status, "not awaiting ci; dropping verdict");
            return Ok(state.status);
        }
        let review_event = if verdict.needs_changes() {
            RunEvent::ReviewRejected
        } else {
            RunEvent::ReviewApproved
        };
        let Some(next) = machine.apply(review_event) else {
            warn!(pr = pr_number, status = %machine.status(), "verdict not applicable; dropping");
            return Ok(machine.status());
        };

        self.tracker
            .set(pr_number, state.status, state.iteration, next, machine.iteration())
            .await?;

        let action = if verdict.needs_changes() {
            ReviewAction::RequestChanges
        } else {
            ReviewAction::Approve
        };
        self.host
            .submit_review(pr_number, action, &review_body(&verdict))
            .await?;

        let note = match next {
            Status::Done => format!("Approved at {}.", short_sha(sha)),
            Status::FixRequested => format!(
                "Changes requested at {}; {} fix item(s) queued for iteration {}.",
                short_sha(sha),
                verdict.required_fixes.len(),
                state.iteration + 1
            ),
            Status::Failed => exhaustion_text(
                self.settings.max_iterations,
                &fix_history(comments),
                &verdict.required_fixes,
            ),
            other => format!("Review recorded at {} ({other}).", short_sha(sha)),
        };
        let marker_note = format!("{note}\n\n{}", review_marker(sha, &verdict.required_fixes));
        self.host.comment(pr_number, &marker_note).await?;

        info!(pr = pr_number, verdict = %verdict.verdict, to = %next, "review applied");
        Ok(next)
    }

    /// The scheduling tick for a requested fix: claim the next iteration,
    /// regenerate, push.
    async fn on_fix_tick(&self, pr_number: u64) -> Result<Status> {
        let state = self.tracker.get(pr_number).await?;
        if state.status.is_terminal() {
            info!(pr = pr_number, status = %state.status, "terminal change request; dropping event");
            return Ok(state.status);
        }

        let mut machine =
            RunMachine::new(state.status, state.iteration, self.settings.max_iterations);
        machine.bump_iteration();
        if machine.apply(RunEvent::FixRequested).is_none() {
            warn!(pr = pr_number, status = %state.status, "no fix pending; dropping tick");
            return Ok(state.status);
        }

        // The claim: this tick owns the new cycle from here on. A racing
        // tick fails the compare-and-set and exits empty-handed.
        self.tracker
            .set(pr_number, state.status, state.iteration, machine.status(), machine.iteration())
            .await?;

        let pull = self.host.get_pull_request(pr_number).await?;
        let comments = self.host.list_comments(pr_number).await?;
        let requirement = self.requirement_for(&pull).await?;
        let (fixes, summary) = match latest_review(&comments) {
            Some((marker, text)) => {
                let summary = if text.is_empty() { None } else { Some(text) };
                (marker.fixes, summary)
            }
            None => (Vec::new(), None),
        };

        let ctx = GenerationContext::fix_cycle(
            requirement,
            pull.head_branch.clone(),
            pull.base_branch.clone(),
            fixes,
            summary,
        );
        match self.code_agent.generate_and_apply(&ctx).await {
            Ok(commit) => {
                machine.apply(RunEvent::CommitPushed);
                // Pending and awaiting-ci share a label; the claim above
                // already persisted this cycle.
                self.host
                    .comment(
                        pr_number,
                        &push_note(
                            &commit.sha,
                            machine.iteration(),
                            commit.files_changed.len(),
                            &commit.diff_hash,
                        ),
                    )
                    .await?;
                info!(
                    pr = pr_number,
                    sha = short_sha(&commit.sha),
                    iteration = machine.iteration(),
                    "fix cycle pushed"
                );
                Ok(machine.status())
            }
            Err(err) => {
                machine.apply(RunEvent::GenerationFailed);
                warn!(pr = pr_number, error = %err, "fix cycle produced no commit");
                self.tracker
                    .set(
                        pr_number,
                        Status::PendingGeneration,
                        machine.iteration(),
                        Status::Failed,
                        machine.iteration(),
                    )
                    .await?;
                self.host
                    .comment(pr_number, &generation_failure_text(&err, machine.iteration()))
                    .await?;
                Ok(Status::Failed)
            }
        }
    }

    /// Operator cancellation: force failed from any non-terminal state.
    async fn on_cancelled(&self, pr_number: u64) -> Result<Status> {
        let state = self.tracker.get(pr_number).await?;
        if state.status.is_terminal() {
            info!(pr = pr_number, status = %state.status, "already terminal; nothing to cancel");
            return Ok(state.status);
        }

        let mut machine =
            RunMachine::new(state.status, state.iteration, self.settings.max_iterations);
        let Some(next) = machine.apply(RunEvent::Cancelled) else {
            return Ok(state.status);
        };

        self.tracker
            .set(pr_number, state.status, state.iteration, next, state.iteration)
            .await?;
        let comments = self.host.list_comments(pr_number).await?;
        self.host
            .comment(
                pr_number,
                &cancel_text(state.status, state.iteration, &fix_history(&comments)),
            )
            .await?;
        info!(pr = pr_number, from = %state.status, "change request cancelled");
        Ok(next)
    }

    /// Sweep every open pull request for stalled managed changes and fail
    /// the ones idle past the configured budget. Covers both fixes whose
    /// tick never came and managed changes whose invocation died
    /// mid-flight.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let cutoff = Utc::now() - Duration::hours(self.settings.stale_after_hours);
        let mut outcome = SweepOutcome::default();

        for pull in self.host.list_open_pull_requests().await? {
            outcome.examined += 1;
            let state = decode(&pull.labels);
            if !matches!(state.status, Status::FixRequested | Status::AwaitingCi) {
                continue;
            }
            if pull.updated_at >= cutoff {
                continue;
            }
            match self
                .tracker
                .set(pull.number, state.status, state.iteration, Status::Failed, state.iteration)
                .await
            {
                Ok(()) => {
                    let note = format!(
                        "No activity for over {} hours at iteration {}; stopping this change request.",
                        self.settings.stale_after_hours, state.iteration
                    );
                    self.host.comment(pull.number, &note).await?;
                    warn!(pr = pull.number, status = %state.status, "stale change request stopped");
                    outcome.stopped.push(pull.number);
                }
                Err(TrackerError::Conflict { .. }) => {
                    info!(pr = pull.number, "labels moved during sweep; skipping");
                    outcome.skipped_conflicts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            examined = outcome.examined,
            stopped = outcome.stopped.len(),
            "sweep complete"
        );
        Ok(outcome)
    }

    /// Read-only snapshot for status output. No side effects.
    pub async fn report(&self, pr_number: u64) -> Result<StatusReport> {
        let pull = self.host.get_pull_request(pr_number).await?;
        let state = decode(&pull.labels);
        let comments = self.host.list_comments(pr_number).await?;
        let last_commit = latest_apply(&comments);
        let change = ChangeRequest {
            pr_number,
            issue_number: linked_issue_number(&pull.body),
            base_branch: pull.base_branch,
            head_branch: pull.head_branch,
            status: state.status,
            iteration: state.iteration,
            last_diff_hash: last_commit.as_ref().map(|m| m.diff_hash.clone()),
        };
        Ok(StatusReport {
            change,
            dirty: state.dirty,
            last_commit,
            reviews: fix_history(&comments),
        })
    }

    /// The text a cycle is judged against: the linked issue when the PR
    /// body names one, else the PR's own title and body.
    async fn requirement_for(&self, pull: &GitHubPullRequest) -> Result<String> {
        if let Some(issue_number) = linked_issue_number(&pull.body) {
            match self.host.get_issue(issue_number).await {
                Ok(issue) => return Ok(issue.requirement_text()),
                Err(HostError::NotFound(_)) => {
                    warn!(
                        pr = pull.number,
                        issue = issue_number,
                        "linked issue not found; using pull request text"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        if pull.body.trim().is_empty() {
            Ok(pull.title.clone())
        } else {
            Ok(format!("{}\n\n{}", pull.title, pull.body))
        }
    }
}

// ---------------------------------------------------------------------------
// Comment rendering
// ---------------------------------------------------------------------------

fn push_note(sha: &str, iteration: u32, files: usize, diff_hash: &str) -> String {
    format!(
        "Pushed {} for iteration {} ({} files changed).\n\n{}",
        short_sha(sha),
        iteration,
        files,
        apply_marker(sha, diff_hash)
    )
}

fn review_body(verdict: &ReviewVerdict) -> String {
    let mut body = verdict.summary.trim().to_string();
    if !verdict.required_fixes.is_empty() {
        body.push_str("\n\nRequired fixes:\n");
        for (i, fix) in verdict.required_fixes.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, fix));
        }
    }
    body.push_str("\n---\n\n");
    body.push_str(&verdict.ci_summary);
    body
}

fn generation_failure_text(err: &AgentError, iteration: u32) -> String {
    let mut body = format!("Generation failed on iteration {iteration}: {err}");
    if let AgentError::Conflict { report } = err {
        body.push_str("\n\n```\n");
        body.push_str(report.trim_end());
        body.push_str("\n```");
    }
    body
}

fn exhaustion_text(max_iterations: u32, prior: &[ReviewMarker], last_fixes: &[String]) -> String {
    let mut body =
        format!("Iteration budget of {max_iterations} exhausted; stopping this change request.\n");
    let cycles = prior
        .iter()
        .map(|m| m.fixes.as_slice())
        .chain(std::iter::once(last_fixes));
    for (i, fixes) in cycles.enumerate() {
        body.push_str(&format!("\nCycle {} asked for:\n", i + 1));
        if fixes.is_empty() {
            body.push_str("- (no items recorded)\n");
        }
        for fix in fixes {
            body.push_str(&format!("- {fix}\n"));
        }
    }
    body
}

fn cancel_text(from: Status, iteration: u32, history: &[ReviewMarker]) -> String {
    let mut body = format!("Cancelled while {from} at iteration {iteration}.");
    if !history.is_empty() {
        body.push_str("\n\nFixes requested so far:\n");
        for (i, marker) in history.iter().enumerate() {
            for fix in &marker.fixes {
                body.push_str(&format!("- (cycle {}) {}\n", i + 1, fix));
            }
        }
    }
    body
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::types::Verdict;

    #[test]
    fn event_kinds_and_pr_numbers() {
        let event = Event::CiCompleted {
            pr: 7,
            outcome: CiOutcome::new("a".repeat(40), vec![]),
        };
        assert_eq!(event.kind(), "ci-completed");
        assert_eq!(event.pr(), Some(7));
        assert_eq!(Event::IssueOpened { issue: 3 }.pr(), None);
    }

    #[test]
    fn review_body_lists_fixes_and_ci() {
        let verdict = ReviewVerdict::request_changes(
            vec!["Fix a".to_string(), "Fix b".to_string()],
            "Not there yet.",
            "CI results",
            0.8,
        );
        let body = review_body(&verdict);
        assert!(body.starts_with("Not there yet."));
        assert!(body.contains("1. Fix a"));
        assert!(body.contains("2. Fix b"));
        assert!(body.ends_with("CI results"));
        assert_eq!(verdict.verdict, Verdict::RequestChanges);
    }

    #[test]
    fn exhaustion_text_numbers_every_cycle() {
        let prior = vec![
            ReviewMarker {
                sha: "s1".to_string(),
                fixes: vec!["fix one".to_string()],
            },
            ReviewMarker {
                sha: "s2".to_string(),
                fixes: vec!["fix two".to_string()],
            },
        ];
        let text = exhaustion_text(3, &prior, &["fix three".to_string()]);
        assert!(text.contains("budget of 3 exhausted"));
        assert!(text.contains("Cycle 1 asked for:\n- fix one"));
        assert!(text.contains("Cycle 2 asked for:\n- fix two"));
        assert!(text.contains("Cycle 3 asked for:\n- fix three"));
    }

    #[test]
    fn generation_failure_text_embeds_conflict_reports() {
        let err = AgentError::Conflict {
            report: "conflict in src/lib.rs at @@ -1,3 +1,4 @@".to_string(),
        };
        let text = generation_failure_text(&err, 2);
        assert!(text.contains("iteration 2"));
        assert!(text.contains("```\nconflict in src/lib.rs"));

        let plain = generation_failure_text(&AgentError::Generation("no diff".to_string()), 1);
        assert!(!plain.contains("```"));
    }
}
