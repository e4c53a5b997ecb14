//! Hosting-platform integration.
//!
//! [`github`] holds the octocrab-backed client and the REST operations
//! the loop performs. [`host`] abstracts them behind the [`host::ChangeHost`]
//! trait so the agents never talk to GitHub directly, which is also what
//! makes them testable offline via [`host::MockHost`].

pub mod github;
pub mod host;
pub mod retry;
pub mod types;
