//! The Code Agent controller: turn a requirement into one pushed commit.
//!
//! One invocation is one cycle: pick context files, ask the model for a
//! diff, apply it atomically, commit and push. The in-invocation retry
//! budget covers both unusable completions and apply conflicts; whatever
//! is left unresolved when it runs out is the caller's problem.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use pl_core::config::AgentSettings;
use pl_core::repo::RepoError;
use pl_core::types::{diff_hash, short_sha, CommitResult};
use pl_intelligence::extract::{extract_first_json, extract_unified_diff};
use pl_intelligence::llm::{LlmConfig, LlmMessage, LlmProvider};
use pl_patch::apply::{apply, Applied, ApplyError};
use pl_patch::diff::Patch;

use crate::prompts;
use crate::workspace::Workspace;

/// Repository listing rows offered to the selection pre-pass.
const MAX_LISTED_FILES: usize = 400;

const SUBJECT_LIMIT: usize = 72;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AgentError {
    /// The capability produced nothing usable, even after the retry.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Both attempts produced diffs that do not match the tree. The
    /// report names every failing hunk.
    #[error("patch failed to apply after retry")]
    Conflict { report: String },

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Patch(#[from] ApplyError),
}

pub type Result<T> = std::result::Result<T, AgentError>;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything one generation cycle needs to know.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Issue title + body, or whatever the change is judged against.
    pub requirement: String,
    pub branch: String,
    pub base: String,
    /// First cycle creates the branch; fix cycles check it out.
    pub fresh_branch: bool,
    /// Required fixes from the last review, empty on the first cycle.
    pub fixes: Vec<String>,
    /// The last review's summary, for fix cycles.
    pub review_summary: Option<String>,
}

impl GenerationContext {
    pub fn first_cycle(requirement: impl Into<String>, branch: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            branch: branch.into(),
            base: base.into(),
            fresh_branch: true,
            fixes: Vec::new(),
            review_summary: None,
        }
    }

    pub fn fix_cycle(
        requirement: impl Into<String>,
        branch: impl Into<String>,
        base: impl Into<String>,
        fixes: Vec<String>,
        review_summary: Option<String>,
    ) -> Self {
        Self {
            requirement: requirement.into(),
            branch: branch.into(),
            base: base.into(),
            fresh_branch: false,
            fixes,
            review_summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct CodeAgent {
    provider: Arc<dyn LlmProvider>,
    workspace: Arc<dyn Workspace>,
    llm: LlmConfig,
    settings: AgentSettings,
}

enum Attempt {
    Applied {
        applied: Applied,
        diff_text: String,
        subject: String,
    },
    NoDiff(String),
    Conflicted(String),
}

impl CodeAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        workspace: Arc<dyn Workspace>,
        llm: LlmConfig,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            workspace,
            llm,
            settings,
        }
    }

    /// Generate a diff for the context, apply it, commit and push.
    ///
    /// The dirty-tree guard runs before anything else: a generated commit
    /// must contain exactly the applied diff and nothing that happened to
    /// be lying around.
    pub async fn generate_and_apply(&self, ctx: &GenerationContext) -> Result<CommitResult> {
        if !self.workspace.is_clean().await? {
            return Err(AgentError::Generation(
                "working tree has local modifications".to_string(),
            ));
        }
        self.workspace
            .prepare_branch(&ctx.branch, &ctx.base, ctx.fresh_branch)
            .await?;

        let selected = self.select_context(ctx).await;
        debug!(files = selected.len(), "context files selected");

        let mut conflict_report: Option<String> = None;
        let mut last_failure: Option<String> = None;
        let mut outcome: Option<(Applied, String, String)> = None;

        for attempt in 1..=self.settings.generation_attempts {
            match self
                .attempt_patch(ctx, &selected, conflict_report.as_deref())
                .await?
            {
                Attempt::Applied {
                    applied,
                    diff_text,
                    subject,
                } => {
                    outcome = Some((applied, diff_text, subject));
                    break;
                }
                Attempt::NoDiff(reason) => {
                    warn!(attempt, %reason, "no usable diff from completion");
                    last_failure = Some(reason);
                }
                Attempt::Conflicted(report) => {
                    warn!(attempt, "generated diff did not apply");
                    conflict_report = Some(report);
                }
            }
        }

        let (applied, diff_text, subject) = match outcome {
            Some(parts) => parts,
            None => {
                // A conflict report outranks a transport reason: it is the
                // one the next iteration can actually act on.
                return Err(match conflict_report {
                    Some(report) => AgentError::Conflict { report },
                    None => AgentError::Generation(
                        last_failure.unwrap_or_else(|| "no diff produced".to_string()),
                    ),
                });
            }
        };

        let sha = self.workspace.commit_all(&subject).await?;
        self.workspace.push(&ctx.branch).await?;

        let hash = diff_hash(&diff_text);
        info!(
            sha = short_sha(&sha),
            files = applied.files.len(),
            additions = applied.additions,
            deletions = applied.deletions,
            "commit pushed"
        );

        Ok(CommitResult {
            sha,
            message: subject,
            files_changed: applied.files,
            diff_hash: hash,
        })
    }

    /// One generation attempt: prompt, extract, parse, apply.
    async fn attempt_patch(
        &self,
        ctx: &GenerationContext,
        selected: &[(String, String)],
        conflict_report: Option<&str>,
    ) -> Result<Attempt> {
        let messages = [
            LlmMessage::system(prompts::PATCH_SYSTEM),
            LlmMessage::user(prompts::patch_prompt(
                &ctx.requirement,
                selected,
                &ctx.fixes,
                ctx.review_summary.as_deref(),
                conflict_report,
            )),
        ];

        let response = match self.provider.complete(&messages, &self.llm).await {
            Ok(r) => r,
            Err(e) => return Ok(Attempt::NoDiff(e.to_string())),
        };

        let diff_text = match extract_unified_diff(&response.content) {
            Some(d) => d,
            None => return Ok(Attempt::NoDiff("completion contains no diff".to_string())),
        };

        let patch = match Patch::parse(&diff_text) {
            Ok(p) => p,
            Err(e) => return Ok(Attempt::NoDiff(format!("unparseable diff: {e}"))),
        };

        match apply(&patch, self.workspace.root()) {
            Ok(applied) => {
                let subject = commit_subject(&response.content, &ctx.requirement);
                Ok(Attempt::Applied {
                    applied,
                    diff_text,
                    subject,
                })
            }
            Err(err @ ApplyError::Conflict { .. }) => {
                let report = err.conflict_report().unwrap_or_default();
                Ok(Attempt::Conflicted(report))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Ask the model which files matter, then inline their contents.
    /// Best effort: any failure here degrades to an empty context rather
    /// than burning the invocation.
    async fn select_context(&self, ctx: &GenerationContext) -> Vec<(String, String)> {
        let files = match self.workspace.tracked_files().await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "file listing failed, generating without context");
                return Vec::new();
            }
        };
        if files.is_empty() {
            return Vec::new();
        }

        let listing: Vec<String> = files.iter().take(MAX_LISTED_FILES).cloned().collect();
        let messages = [
            LlmMessage::system(prompts::SELECTION_SYSTEM),
            LlmMessage::user(prompts::selection_prompt(
                &ctx.requirement,
                &listing,
                self.settings.max_context_files,
            )),
        ];

        let response = match self.provider.complete(&messages, &self.llm).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "file selection failed, generating without context");
                return Vec::new();
            }
        };

        let mut selected = Vec::new();
        for path in parse_selection(&response.content)
            .into_iter()
            .filter(|p| files.contains(p))
            .take(self.settings.max_context_files)
        {
            match self
                .workspace
                .read_file(&path, self.settings.max_file_bytes)
                .await
            {
                Ok(Some(content)) => selected.push((path, content)),
                Ok(None) => {}
                Err(e) => warn!(path, error = %e, "context file unreadable"),
            }
        }
        selected
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Paths out of a selection completion. Unparseable input selects nothing.
fn parse_selection(text: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct Selection {
        #[serde(default)]
        files: Vec<String>,
    }

    extract_first_json(text)
        .and_then(|json| serde_json::from_str::<Selection>(&json).ok())
        .map(|s| s.files)
        .unwrap_or_default()
}

/// The commit subject: the completion's summary line when it wrote one,
/// else the first line of the requirement. The summary is whatever
/// non-empty text precedes the diff; hunk bodies never qualify.
fn commit_subject(completion: &str, requirement: &str) -> String {
    let summary = completion
        .lines()
        .map(str::trim)
        .take_while(|l| !l.starts_with("```") && !looks_like_diff(l))
        .find(|l| !l.is_empty());
    let line = match summary {
        Some(l) => l,
        None => requirement
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("Automated change"),
    };
    truncate_subject(line, SUBJECT_LIMIT)
}

fn looks_like_diff(line: &str) -> bool {
    line.starts_with("diff --git")
        || line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line.starts_with("@@")
        || line.starts_with("index ")
}

fn truncate_subject(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
