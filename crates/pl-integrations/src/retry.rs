//! Bounded retry with exponential backoff for host calls.
//!
//! The loop treats rate limits and 5xx responses as capability errors:
//! the work is still valid, the host just cannot take it right now. Those
//! get a handful of spaced retries; everything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::github::GitHubError;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Run `op`, retrying per `policy` while `is_transient` says the failure
/// is worth waiting out. The last error is returned once attempts run out.
pub async fn with_backoff<T, E, F, Fut>(
    policy: Backoff,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.base_delay;
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && is_transient(&err) => {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient host error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Whether a GitHub failure is worth retrying: server errors, primary
/// rate limits, and secondary rate limits (403 with a rate-limit body).
/// Auth and not-found errors are not.
pub fn github_transient(err: &GitHubError) -> bool {
    match err {
        GitHubError::Api(octocrab::Error::GitHub { source, .. }) => {
            let status = source.status_code;
            status.is_server_error()
                || status.as_u16() == 429
                || (status.as_u16() == 403
                    && source.message.to_ascii_lowercase().contains("rate limit"))
        }
        GitHubError::Api(octocrab::Error::Service { .. })
        | GitHubError::Api(octocrab::Error::Hyper { .. }) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
