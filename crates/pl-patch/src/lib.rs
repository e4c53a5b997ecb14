//! Unified-diff parsing and atomic application.
//!
//! Model-generated patches arrive as unified diff text. [`diff`] parses
//! that text into a structured [`diff::Patch`]; [`apply`] matches every
//! hunk against the working tree in memory and only then touches disk, so
//! a failing hunk never leaves a half-applied tree behind.

pub mod apply;
pub mod diff;
