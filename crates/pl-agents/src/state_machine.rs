use std::fmt;

use serde::{Deserialize, Serialize};

use pl_core::types::Status;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// What happened, stripped down to the part the transition function cares
/// about. External triggers and the loop's own progress reports share one
/// vocabulary so every status change, internal or not, goes through
/// [`next_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    /// A new issue entered the loop.
    IssueOpened,
    /// The scheduling tick for a change whose review requested fixes.
    FixRequested,
    /// The Code Agent applied a diff and pushed a commit.
    CommitPushed,
    /// Generation or application failed beyond its in-invocation retries.
    GenerationFailed,
    /// CI finished for the current head commit.
    CiCompleted,
    /// The Reviewer approved.
    ReviewApproved,
    /// The Reviewer requested changes.
    ReviewRejected,
    /// Manual cancellation.
    Cancelled,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunEvent::IssueOpened => "issue-opened",
            RunEvent::FixRequested => "fix-requested",
            RunEvent::CommitPushed => "commit-pushed",
            RunEvent::GenerationFailed => "generation-failed",
            RunEvent::CiCompleted => "ci-completed",
            RunEvent::ReviewApproved => "review-approved",
            RunEvent::ReviewRejected => "review-rejected",
            RunEvent::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Compute the next status. Pure: no I/O, no clock, no randomness.
///
/// `None` means the (status, event) pair is not recognized; the caller
/// logs it and performs no side effects. Terminal statuses absorb every
/// event this way, which is what makes replayed deliveries harmless.
///
/// `iteration` is the number of the cycle currently under review; a
/// rejection with no budget left fails the change instead of queueing
/// another fix.
pub fn next_status(
    current: Status,
    event: RunEvent,
    iteration: u32,
    max_iterations: u32,
) -> Option<Status> {
    use RunEvent as E;
    use Status as S;

    let next = match (current, event) {
        (S::Unmanaged, E::IssueOpened) => S::PendingGeneration,
        (S::PendingGeneration, E::CommitPushed) => S::AwaitingCi,
        (S::PendingGeneration, E::GenerationFailed) => S::Failed,
        (S::AwaitingCi, E::CiCompleted) => S::AwaitingReview,
        (S::AwaitingReview, E::ReviewApproved) => S::Done,
        (S::AwaitingReview, E::ReviewRejected) => {
            if iteration < max_iterations {
                S::FixRequested
            } else {
                S::Failed
            }
        }
        (S::FixRequested, E::FixRequested) => S::PendingGeneration,
        (current, E::Cancelled) if !current.is_terminal() => S::Failed,
        _ => return None,
    };
    Some(next)
}

// ---------------------------------------------------------------------------
// RunMachine
// ---------------------------------------------------------------------------

/// [`next_status`] plus bookkeeping: current status, the iteration the
/// budget check reads, and a transition history for diagnostics. One of
/// these lives for exactly one event-handling invocation; persistence is
/// the tracker's job.
#[derive(Debug, Clone)]
pub struct RunMachine {
    current: Status,
    iteration: u32,
    max_iterations: u32,
    history: Vec<(Status, RunEvent, Status)>,
}

impl RunMachine {
    pub fn new(current: Status, iteration: u32, max_iterations: u32) -> Self {
        Self {
            current,
            iteration,
            max_iterations,
            history: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn history(&self) -> &[(Status, RunEvent, Status)] {
        &self.history
    }

    /// The fix tick claims the next cycle before regenerating.
    pub fn bump_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Apply one event. Returns the new status, or `None` for an
    /// unrecognized pair, in which case nothing changes.
    pub fn apply(&mut self, event: RunEvent) -> Option<Status> {
        match next_status(self.current, event, self.iteration, self.max_iterations) {
            Some(next) => {
                let from = self.current;
                self.current = next;
                self.history.push((from, event, next));
                tracing::debug!(from = %from, event = %event, to = %next, "status transition");
                Some(next)
            }
            None => {
                tracing::debug!(status = %self.current, event = %event, "event ignored");
                None
            }
        }
    }
}
