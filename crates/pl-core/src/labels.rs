//! Label codec: the loop's status and iteration live on the pull request
//! itself as `agent:*` labels, so the host is the only durable store.
//!
//! The three `managed-*` statuses collapse onto one label: pending
//! generation, awaiting CI and awaiting review all persist as
//! `agent:managed`, because the finer distinction is only meaningful
//! inside a single invocation. [`decode`] therefore resolves `agent:managed` to
//! [`Status::AwaitingCi`]; the orchestrator re-derives anything finer from
//! marker comments.
//!
//! Labels the codec does not recognise belong to humans and are preserved
//! verbatim by [`encode`].

use serde::{Deserialize, Serialize};

use crate::types::Status;

// ---------------------------------------------------------------------------
// Label names
// ---------------------------------------------------------------------------

/// A generation or review cycle is in flight (or waiting on CI).
pub const LABEL_MANAGED: &str = "agent:managed";
/// Reviewer requested changes; the next fix cycle may claim this PR.
pub const LABEL_FIX: &str = "agent:fix";
/// Reviewer approved. Terminal.
pub const LABEL_DONE: &str = "agent:done";
/// The loop gave up or was cancelled. Terminal.
pub const LABEL_STOPPED: &str = "agent:stopped";
/// Prefix of the iteration counter label, e.g. `agent:iter-2`.
pub const ITER_PREFIX: &str = "agent:iter-";

/// The durable label for a status, `None` for [`Status::Unmanaged`].
pub fn status_label(status: Status) -> Option<&'static str> {
    match status {
        Status::Unmanaged => None,
        Status::PendingGeneration | Status::AwaitingCi | Status::AwaitingReview => {
            Some(LABEL_MANAGED)
        }
        Status::FixRequested => Some(LABEL_FIX),
        Status::Done => Some(LABEL_DONE),
        Status::Failed => Some(LABEL_STOPPED),
    }
}

pub fn iteration_label(iteration: u32) -> String {
    format!("{}{}", ITER_PREFIX, iteration)
}

/// Parse `agent:iter-N`. Anything after the prefix that is not a plain
/// decimal number is rejected.
pub fn parse_iteration(label: &str) -> Option<u32> {
    let digits = label.strip_prefix(ITER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// True for every label the codec owns; everything else is foreign and
/// must survive a rewrite untouched.
pub fn is_agent_label(label: &str) -> bool {
    matches!(label, LABEL_MANAGED | LABEL_FIX | LABEL_DONE | LABEL_STOPPED)
        || parse_iteration(label).is_some()
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Loop state as read back from a pull request's labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelState {
    pub status: Status,
    pub iteration: u32,
    /// Set when the labels are inconsistent: more than one status label,
    /// more than one iteration label, or a status/iteration pair the loop
    /// would never write. A dirty read still decodes deterministically;
    /// the next successful write repairs the label set.
    pub dirty: bool,
}

impl LabelState {
    /// The state of a pull request the loop has never written to.
    pub fn unmanaged() -> Self {
        Self {
            status: Status::Unmanaged,
            iteration: 0,
            dirty: false,
        }
    }
}

/// Decode a label set into loop state.
///
/// When several status labels are present (a human raced the loop), the
/// most final one wins: `stopped` over `done` over `fix` over `managed`.
pub fn decode(labels: &[String]) -> LabelState {
    let mut managed = false;
    let mut fix = false;
    let mut done = false;
    let mut stopped = false;
    let mut iterations: Vec<u32> = Vec::new();

    for label in labels {
        match label.as_str() {
            LABEL_MANAGED => managed = true,
            LABEL_FIX => fix = true,
            LABEL_DONE => done = true,
            LABEL_STOPPED => stopped = true,
            other => {
                if let Some(n) = parse_iteration(other) {
                    iterations.push(n);
                }
            }
        }
    }

    let status_count = [managed, fix, done, stopped].iter().filter(|p| **p).count();
    let status = if stopped {
        Status::Failed
    } else if done {
        Status::Done
    } else if fix {
        Status::FixRequested
    } else if managed {
        Status::AwaitingCi
    } else {
        Status::Unmanaged
    };

    let iteration = iterations.iter().copied().max().unwrap_or(0);
    let dirty = status_count > 1
        || iterations.len() > 1
        || (status.is_managed() && iteration == 0)
        || (!status.is_managed() && iteration > 0);

    LabelState {
        status,
        iteration,
        dirty,
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Produce the full label set for a status/iteration pair, carrying over
/// every foreign label from `existing`. The result is meant for a single
/// replace-all write so the "exactly one status label" invariant can never
/// be observed broken.
pub fn encode(status: Status, iteration: u32, existing: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = existing
        .iter()
        .filter(|l| !is_agent_label(l))
        .cloned()
        .collect();
    if let Some(label) = status_label(status) {
        labels.push(label.to_string());
        if iteration > 0 {
            labels.push(iteration_label(iteration));
        }
    }
    labels
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn iteration_label_round_trips() {
        assert_eq!(iteration_label(3), "agent:iter-3");
        assert_eq!(parse_iteration("agent:iter-3"), Some(3));
        assert_eq!(parse_iteration("agent:iter-12"), Some(12));
    }

    #[test]
    fn parse_iteration_rejects_junk() {
        assert_eq!(parse_iteration("agent:iter-"), None);
        assert_eq!(parse_iteration("agent:iter-x"), None);
        assert_eq!(parse_iteration("agent:iter-12a"), None);
        assert_eq!(parse_iteration("agent:managed"), None);
        assert_eq!(parse_iteration("iter-3"), None);
    }

    #[test]
    fn status_labels_cover_every_managed_status() {
        assert_eq!(status_label(Status::Unmanaged), None);
        assert_eq!(status_label(Status::PendingGeneration), Some(LABEL_MANAGED));
        assert_eq!(status_label(Status::AwaitingCi), Some(LABEL_MANAGED));
        assert_eq!(status_label(Status::AwaitingReview), Some(LABEL_MANAGED));
        assert_eq!(status_label(Status::FixRequested), Some(LABEL_FIX));
        assert_eq!(status_label(Status::Done), Some(LABEL_DONE));
        assert_eq!(status_label(Status::Failed), Some(LABEL_STOPPED));
    }

    #[test]
    fn decode_empty_is_unmanaged() {
        let state = decode(&[]);
        assert_eq!(state, LabelState::unmanaged());
    }

    #[test]
    fn decode_managed_resolves_to_awaiting_ci() {
        let state = decode(&labels(&["agent:managed", "agent:iter-1"]));
        assert_eq!(state.status, Status::AwaitingCi);
        assert_eq!(state.iteration, 1);
        assert!(!state.dirty);
    }

    #[test]
    fn decode_fix_and_terminals() {
        let state = decode(&labels(&["agent:fix", "agent:iter-2"]));
        assert_eq!(state.status, Status::FixRequested);
        assert_eq!(state.iteration, 2);
        assert!(!state.dirty);

        let done = decode(&labels(&["agent:done", "agent:iter-3"]));
        assert_eq!(done.status, Status::Done);

        let stopped = decode(&labels(&["agent:stopped", "agent:iter-3"]));
        assert_eq!(stopped.status, Status::Failed);
    }

    #[test]
    fn decode_ignores_foreign_labels() {
        let state = decode(&labels(&["bug", "agent:fix", "agent:iter-1", "p1"]));
        assert_eq!(state.status, Status::FixRequested);
        assert_eq!(state.iteration, 1);
        assert!(!state.dirty);
    }

    #[test]
    fn decode_conflicting_status_labels_is_dirty_and_most_final_wins() {
        let state = decode(&labels(&["agent:fix", "agent:done", "agent:iter-2"]));
        assert_eq!(state.status, Status::Done);
        assert!(state.dirty);

        let state = decode(&labels(&["agent:managed", "agent:stopped", "agent:iter-1"]));
        assert_eq!(state.status, Status::Failed);
        assert!(state.dirty);
    }

    #[test]
    fn decode_duplicate_iteration_labels_takes_max_and_is_dirty() {
        let state = decode(&labels(&["agent:managed", "agent:iter-1", "agent:iter-2"]));
        assert_eq!(state.iteration, 2);
        assert!(state.dirty);
    }

    #[test]
    fn decode_status_without_iteration_is_dirty() {
        let state = decode(&labels(&["agent:managed"]));
        assert_eq!(state.status, Status::AwaitingCi);
        assert_eq!(state.iteration, 0);
        assert!(state.dirty);
    }

    #[test]
    fn decode_iteration_without_status_is_dirty() {
        let state = decode(&labels(&["agent:iter-2"]));
        assert_eq!(state.status, Status::Unmanaged);
        assert_eq!(state.iteration, 2);
        assert!(state.dirty);
    }

    #[test]
    fn encode_preserves_foreign_labels_in_order() {
        let existing = labels(&["bug", "agent:managed", "agent:iter-1", "help wanted"]);
        let out = encode(Status::FixRequested, 1, &existing);
        assert_eq!(out, labels(&["bug", "help wanted", "agent:fix", "agent:iter-1"]));
    }

    #[test]
    fn encode_replaces_stale_agent_labels() {
        let existing = labels(&["agent:fix", "agent:iter-1", "agent:iter-2"]);
        let out = encode(Status::AwaitingCi, 2, &existing);
        assert_eq!(out, labels(&["agent:managed", "agent:iter-2"]));
    }

    #[test]
    fn encode_unmanaged_strips_agent_labels() {
        let existing = labels(&["bug", "agent:managed", "agent:iter-1"]);
        let out = encode(Status::Unmanaged, 0, &existing);
        assert_eq!(out, labels(&["bug"]));
    }

    #[test]
    fn encode_decode_round_trip_for_live_statuses() {
        for (status, expected) in [
            (Status::AwaitingCi, Status::AwaitingCi),
            (Status::PendingGeneration, Status::AwaitingCi),
            (Status::AwaitingReview, Status::AwaitingCi),
            (Status::FixRequested, Status::FixRequested),
            (Status::Done, Status::Done),
            (Status::Failed, Status::Failed),
        ] {
            let encoded = encode(status, 2, &[]);
            let state = decode(&encoded);
            assert_eq!(state.status, expected, "status {status}");
            assert_eq!(state.iteration, 2);
            assert!(!state.dirty, "status {status}");
        }
    }
}
