//! GitHub REST operations, grouped the way the API groups them.
//!
//! Typed octocrab handlers cover issues, pull requests and comments;
//! labels and reviews go through the client's generic REST helpers
//! because octocrab has no typed surface for the exact calls the loop
//! needs (notably the replace-all label write).

pub mod client;
pub mod comments;
pub mod issues;
pub mod labels;
pub mod pull_requests;
pub mod reviews;

pub use client::{GitHubClient, GitHubError, Result};
pub use reviews::ReviewAction;
