//! Label-backed persistence for `(status, iteration)`.
//!
//! The label set on the pull request is the durable state; this adapter
//! is the only writer. `set` re-reads the live labels and compares them
//! against the state the caller thinks it is transitioning from. A
//! mismatch means another invocation got there first, and the whole
//! invocation aborts with [`TrackerError::Conflict`] before any write.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use pl_core::labels::{decode, encode, status_label, LabelState};
use pl_core::types::Status;
use pl_integrations::host::{ChangeHost, HostError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The live labels no longer match the expected prior state. Another
    /// writer won; abort without side effects.
    #[error("state changed underneath: expected {expected}, found {found}")]
    Conflict { expected: String, found: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct IterationTracker {
    host: Arc<dyn ChangeHost>,
}

impl IterationTracker {
    pub fn new(host: Arc<dyn ChangeHost>) -> Self {
        Self { host }
    }

    /// Read and decode the persisted state of a pull request.
    pub async fn get(&self, pr: u64) -> Result<LabelState> {
        let labels = self.host.list_labels(pr).await?;
        Ok(decode(&labels))
    }

    /// Transition the persisted state from `(expected, expected_iteration)`
    /// to `(status, iteration)` in one full-replace label write.
    ///
    /// The expectation is compared in persisted form: statuses that share
    /// a label (the managed trio) are interchangeable here, since the
    /// labels cannot tell them apart either. Foreign labels survive the
    /// write untouched, and a dirty set is repaired as a side effect.
    pub async fn set(
        &self,
        pr: u64,
        expected: Status,
        expected_iteration: u32,
        status: Status,
        iteration: u32,
    ) -> Result<()> {
        let live = self.host.list_labels(pr).await?;
        let decoded = decode(&live);

        let matches = status_label(decoded.status) == status_label(expected)
            && decoded.iteration == expected_iteration;
        if !matches {
            return Err(TrackerError::Conflict {
                expected: render_state(expected, expected_iteration),
                found: render_state(decoded.status, decoded.iteration),
            });
        }

        let next = encode(status, iteration, &live);
        self.host.set_labels(pr, &next).await?;
        info!(pr, from = %decoded.status, to = %status, iteration, "persisted state transition");
        Ok(())
    }
}

fn render_state(status: Status, iteration: u32) -> String {
    format!("{status}/iter-{iteration}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pl_integrations::host::MockHost;

    fn tracker_with_host() -> (IterationTracker, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        (IterationTracker::new(host.clone()), host)
    }

    #[tokio::test]
    async fn fresh_pr_reads_as_unmanaged() {
        let (tracker, _host) = tracker_with_host();
        let state = tracker.get(7).await.unwrap();
        assert_eq!(state, LabelState::unmanaged());
    }

    #[tokio::test]
    async fn set_writes_status_and_iteration_labels() {
        let (tracker, host) = tracker_with_host();

        tracker
            .set(7, Status::Unmanaged, 0, Status::AwaitingCi, 1)
            .await
            .unwrap();

        let labels = host.labels_of(7);
        assert!(labels.contains(&"agent:managed".to_string()));
        assert!(labels.contains(&"agent:iter-1".to_string()));

        let state = tracker.get(7).await.unwrap();
        assert_eq!(state.status, Status::AwaitingCi);
        assert_eq!(state.iteration, 1);
    }

    #[tokio::test]
    async fn stale_expectation_conflicts_and_writes_nothing() {
        let (tracker, host) = tracker_with_host();
        host.put_labels(7, vec!["agent:fix".to_string(), "agent:iter-2".to_string()]);

        let err = tracker
            .set(7, Status::AwaitingCi, 1, Status::Done, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Conflict { .. }));

        // Not overwritten.
        assert_eq!(
            host.labels_of(7),
            vec!["agent:fix".to_string(), "agent:iter-2".to_string()]
        );
    }

    #[tokio::test]
    async fn managed_statuses_are_interchangeable_expectations() {
        let (tracker, host) = tracker_with_host();
        host.put_labels(
            7,
            vec!["agent:managed".to_string(), "agent:iter-2".to_string()],
        );

        // Labels decode to AwaitingCi, but an invocation mid-flight thinks
        // of the same persisted state as PendingGeneration. Same label, no
        // conflict.
        tracker
            .set(7, Status::PendingGeneration, 2, Status::AwaitingCi, 2)
            .await
            .unwrap();
        assert_eq!(
            host.labels_of(7),
            vec!["agent:managed".to_string(), "agent:iter-2".to_string()]
        );
    }

    #[tokio::test]
    async fn foreign_labels_survive_transitions() {
        let (tracker, host) = tracker_with_host();
        host.put_labels(
            7,
            vec![
                "bug".to_string(),
                "agent:managed".to_string(),
                "agent:iter-1".to_string(),
                "help wanted".to_string(),
            ],
        );

        tracker
            .set(7, Status::AwaitingCi, 1, Status::FixRequested, 1)
            .await
            .unwrap();

        let labels = host.labels_of(7);
        assert!(labels.contains(&"bug".to_string()));
        assert!(labels.contains(&"help wanted".to_string()));
        assert!(labels.contains(&"agent:fix".to_string()));
        assert!(!labels.contains(&"agent:managed".to_string()));
    }

    #[tokio::test]
    async fn failed_write_swaps_to_the_stopped_label() {
        let (tracker, host) = tracker_with_host();
        host.put_labels(
            7,
            vec!["agent:fix".to_string(), "agent:iter-3".to_string()],
        );

        tracker
            .set(7, Status::FixRequested, 3, Status::Failed, 3)
            .await
            .unwrap();

        let labels = host.labels_of(7);
        assert!(labels.contains(&"agent:stopped".to_string()));
        assert!(!labels.contains(&"agent:fix".to_string()));
        // The iteration the change died at stays visible.
        assert!(labels.contains(&"agent:iter-3".to_string()));
    }
}
