//! Atomic application of a parsed [`Patch`] to a working tree.
//!
//! Application is two-phase. The plan phase reads every touched file and
//! matches every hunk in memory, collecting conflicts instead of stopping
//! at the first one. Only a fully clean plan reaches the write phase, so
//! a rejected patch leaves the tree byte-for-byte untouched and the
//! caller gets every failing hunk in one report.
//!
//! Hunk matching is position-tolerant: the hunk's old text is searched
//! near its header position (within [`SEARCH_WINDOW`] lines, nearest
//! first), with a whitespace-relaxed second pass for trees whose trailing
//! whitespace drifted from what the model saw.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::{FilePatch, Hunk, Patch};

/// How far from the header position a hunk may drift before it counts as
/// a conflict.
const SEARCH_WINDOW: i64 = 100;

/// How many expected lines a rendered conflict shows.
const RENDER_LINES: usize = 12;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One hunk that failed to match, with enough context to tell a model (or
/// a human) what the engine was looking for and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkConflict {
    pub path: String,
    /// The rendered `@@` header of the failing hunk.
    pub hunk: String,
    /// 1-based line in the current file where the old text was expected.
    pub line: usize,
    /// The old-side lines the engine searched for.
    pub expected: Vec<String>,
    pub reason: String,
}

impl HunkConflict {
    /// Plain-text rendering, used verbatim in regeneration prompts.
    pub fn render(&self) -> String {
        let mut out = format!(
            "conflict in {} at {} (near line {}): {}\n",
            self.path, self.hunk, self.line, self.reason
        );
        if !self.expected.is_empty() {
            out.push_str("expected to find:\n");
            for line in self.expected.iter().take(RENDER_LINES) {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
            if self.expected.len() > RENDER_LINES {
                out.push_str(&format!(
                    "    ... and {} more lines\n",
                    self.expected.len() - RENDER_LINES
                ));
            }
        }
        out
    }
}

pub fn render_conflicts(conflicts: &[HunkConflict]) -> String {
    conflicts
        .iter()
        .map(HunkConflict::render)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("patch does not apply: {} hunk(s) failed to match", .conflicts.len())]
    Conflict { conflicts: Vec<HunkConflict> },

    #[error("patch touches a path outside the working tree: {0}")]
    PathEscape(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApplyError {
    /// The full conflict report when this is a conflict, `None` otherwise.
    pub fn conflict_report(&self) -> Option<String> {
        match self {
            ApplyError::Conflict { conflicts } => Some(render_conflicts(conflicts)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Summary of a clean application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applied {
    /// Touched paths in patch order.
    pub files: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Plan the patch without writing anything.
pub fn check(patch: &Patch, root: &Path) -> Result<Applied, ApplyError> {
    plan(patch, root).map(|(_, applied)| applied)
}

/// Apply the patch. Writes happen only after every hunk of every file has
/// matched; on [`ApplyError::Conflict`] the tree is untouched.
pub fn apply(patch: &Patch, root: &Path) -> Result<Applied, ApplyError> {
    let (ops, applied) = plan(patch, root)?;
    for op in ops {
        match op {
            PlannedOp::Write { path, content } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, content)?;
            }
            PlannedOp::Remove { path } => {
                std::fs::remove_file(&path)?;
            }
        }
    }
    tracing::debug!(
        files = applied.files.len(),
        additions = applied.additions,
        deletions = applied.deletions,
        "patch applied"
    );
    Ok(applied)
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

enum PlannedOp {
    Write { path: PathBuf, content: String },
    Remove { path: PathBuf },
}

fn plan(patch: &Patch, root: &Path) -> Result<(Vec<PlannedOp>, Applied), ApplyError> {
    let mut ops = Vec::new();
    let mut conflicts = Vec::new();

    for file in &patch.files {
        if file.is_create() {
            let target = safe_join(root, file.display_path())?;
            if target.exists() {
                conflicts.push(whole_file_conflict(file, "file already exists"));
                continue;
            }
            ops.push(PlannedOp::Write {
                path: target,
                content: created_content(file),
            });
            continue;
        }

        let old_rel = file.old_path.as_deref().unwrap_or_default();
        let source = safe_join(root, old_rel)?;
        let original = match std::fs::read_to_string(&source) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                conflicts.push(whole_file_conflict(file, "file does not exist"));
                continue;
            }
            Err(e) => return Err(ApplyError::Io(e)),
        };

        if file.is_delete() {
            match verify_delete(&original, file) {
                Ok(()) => ops.push(PlannedOp::Remove { path: source }),
                Err(conflict) => conflicts.push(conflict),
            }
            continue;
        }

        let target = safe_join(root, file.display_path())?;
        let (content, file_conflicts) = apply_hunks(&original, file);
        if file_conflicts.is_empty() {
            ops.push(PlannedOp::Write {
                path: target,
                content,
            });
            if file.is_rename() {
                ops.push(PlannedOp::Remove { path: source });
            }
        } else {
            conflicts.extend(file_conflicts);
        }
    }

    if !conflicts.is_empty() {
        return Err(ApplyError::Conflict { conflicts });
    }

    let applied = Applied {
        files: patch
            .touched_paths()
            .into_iter()
            .map(String::from)
            .collect(),
        additions: patch.additions(),
        deletions: patch.deletions(),
    };
    Ok((ops, applied))
}

/// Join a patch-relative path onto the tree root, rejecting absolute
/// paths and any `..` traversal.
fn safe_join(root: &Path, rel: &str) -> Result<PathBuf, ApplyError> {
    let path = Path::new(rel);
    if path.is_absolute() {
        return Err(ApplyError::PathEscape(rel.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(ApplyError::PathEscape(rel.to_string())),
        }
    }
    Ok(root.join(path))
}

fn whole_file_conflict(file: &FilePatch, reason: &str) -> HunkConflict {
    HunkConflict {
        path: file.display_path().to_string(),
        hunk: file
            .hunks
            .first()
            .map(Hunk::header)
            .unwrap_or_else(|| "@@".to_string()),
        line: 1,
        expected: Vec::new(),
        reason: reason.to_string(),
    }
}

fn created_content(file: &FilePatch) -> String {
    let lines: Vec<&str> = file.hunks.iter().flat_map(|h| h.new_lines()).collect();
    join_lines(&lines, !file.new_missing_newline)
}

fn verify_delete(original: &str, file: &FilePatch) -> Result<(), HunkConflict> {
    let current: Vec<&str> = original.lines().collect();
    let expected: Vec<&str> = file.hunks.iter().flat_map(|h| h.old_lines()).collect();
    let matches = current.len() == expected.len()
        && current
            .iter()
            .zip(&expected)
            .all(|(a, b)| a.trim_end() == b.trim_end());
    if matches {
        Ok(())
    } else {
        Err(HunkConflict {
            path: file.display_path().to_string(),
            hunk: file
                .hunks
                .first()
                .map(Hunk::header)
                .unwrap_or_else(|| "@@".to_string()),
            line: 1,
            expected: expected.into_iter().map(String::from).collect(),
            reason: "file content does not match the deletion".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Hunk matching
// ---------------------------------------------------------------------------

fn apply_hunks(original: &str, file: &FilePatch) -> (String, Vec<HunkConflict>) {
    let had_trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut lines: Vec<String> = original.lines().map(String::from).collect();
    let mut conflicts = Vec::new();
    // Cumulative line drift introduced by earlier hunks of this file.
    let mut offset: i64 = 0;

    for hunk in &file.hunks {
        let old = hunk.old_lines();
        let new = hunk.new_lines();

        if old.is_empty() {
            // Pure insertion: old_start names the line the insert follows.
            let at = clamp_index(hunk.old_start as i64 + offset, lines.len());
            lines.splice(at..at, new.iter().map(|s| s.to_string()));
            offset += new.len() as i64;
            continue;
        }

        let anchor = hunk.old_start as i64 - 1 + offset;
        match find_match(&lines, &old, anchor) {
            Some(pos) => {
                if pos as i64 != anchor {
                    tracing::debug!(
                        path = %file.display_path(),
                        hunk = %hunk.header(),
                        drift = pos as i64 - anchor,
                        "hunk applied at drifted position"
                    );
                }
                lines.splice(pos..pos + old.len(), new.iter().map(|s| s.to_string()));
                offset += new.len() as i64 - old.len() as i64;
            }
            None => conflicts.push(HunkConflict {
                path: file.display_path().to_string(),
                hunk: hunk.header(),
                line: clamp_index(anchor, lines.len().saturating_sub(1)) + 1,
                expected: old.iter().map(|s| s.to_string()).collect(),
                reason: "context does not match the file".to_string(),
            }),
        }
    }

    let want_trailing = if file.new_missing_newline {
        false
    } else if file.old_missing_newline {
        true
    } else {
        had_trailing_newline
    };
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    (join_lines(&refs, want_trailing), conflicts)
}

/// Find where the hunk's old text sits in the file: exact match first,
/// nearest to the anchor first, then a whitespace-relaxed pass.
fn find_match(lines: &[String], old: &[&str], anchor: i64) -> Option<usize> {
    for relaxed in [false, true] {
        for delta in 0..=SEARCH_WINDOW {
            let candidates = if delta == 0 {
                [anchor, anchor]
            } else {
                [anchor - delta, anchor + delta]
            };
            for (i, &cand) in candidates.iter().enumerate() {
                if delta == 0 && i == 1 {
                    continue;
                }
                if cand < 0 {
                    continue;
                }
                let pos = cand as usize;
                if pos + old.len() > lines.len() {
                    continue;
                }
                if matches_at(lines, old, pos, relaxed) {
                    return Some(pos);
                }
            }
        }
    }
    None
}

fn matches_at(lines: &[String], old: &[&str], pos: usize, relaxed: bool) -> bool {
    old.iter().enumerate().all(|(i, expected)| {
        let actual = lines[pos + i].as_str();
        if relaxed {
            actual.trim_end() == expected.trim_end()
        } else {
            actual == *expected
        }
    })
}

fn clamp_index(value: i64, max: usize) -> usize {
    value.clamp(0, max as i64) as usize
}

fn join_lines(lines: &[&str], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
