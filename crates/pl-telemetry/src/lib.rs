//! Tracing subscriber setup for the patchloop binaries.
//!
//! Every invocation of the loop is a short-lived process, so telemetry
//! here means one thing: install a `tracing` subscriber before the first
//! event is handled. Human-readable output for terminals, JSON for CI
//! log collectors.

pub mod logging;

pub use logging::{init_logging, init_logging_json};
