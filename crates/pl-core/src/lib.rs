//! Core types and repository plumbing shared by every patchloop crate.

pub mod config;
pub mod git2_ops;
pub mod labels;
pub mod repo;
pub mod types;
